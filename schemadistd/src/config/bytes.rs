// Copyright 2018-2022 Cargill Incorporated
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Human-readable byte sizes, such as `16.5M`, used for rolling log file limits.

use serde::de::Visitor;
use serde::Deserialize;

#[derive(Clone, Debug, PartialEq)]
pub struct ByteSize {
    size: u64,
}

impl ByteSize {
    pub fn get_mem_size(&self) -> u64 {
        self.size
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(ByteSizeVisitor)
    }
}

struct ByteSizeVisitor;

impl<'de> Visitor<'de> for ByteSizeVisitor {
    type Value = ByteSize;

    fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        self.visit_str(&v)
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        // <digits>[.<digits>] followed by K, M or G
        let numeric: Result<f64, _> = v
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect::<String>()
            .parse();
        let unit = v
            .chars()
            .skip_while(|c| c.is_ascii_digit() || *c == '.')
            .take_while(|c| c.is_alphabetic())
            .collect::<String>();
        let multiple = match unit.as_str() {
            "K" => Ok(1_000),
            "M" => Ok(1_000_000),
            "G" => Ok(1_000_000_000),
            _ => Err(E::custom(format!("unit could not be parsed: {:?}", unit))),
        };
        match (numeric, multiple) {
            (Ok(value), Ok(multiple)) => Ok(ByteSize {
                size: (value * multiple as f64).trunc() as u64,
            }),
            (Err(e), _) => Err(E::custom(format!("size could not be parsed: {}", e))),
            (_, Err(e)) => Err(e),
        }
    }

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "<float><K|M|G>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_derive::Deserialize;

    #[derive(Deserialize)]
    struct Limit {
        size: ByteSize,
    }

    /// Verifies that sizes with each unit are parsed and that unknown units are rejected.
    #[test]
    fn test_parse_sizes() {
        let parse = |text: &str| toml::from_str::<Limit>(&format!("size = \"{}\"", text));

        assert_eq!(parse("16M").unwrap().size.get_mem_size(), 16_000_000);
        assert_eq!(parse("1.5K").unwrap().size.get_mem_size(), 1_500);
        assert_eq!(parse("2G").unwrap().size.get_mem_size(), 2_000_000_000);
        assert!(parse("12").is_err());
        assert!(parse("12T").is_err());
    }
}
