// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::fmt::Display;
use std::sync::LazyLock;

use datafusion_common::config::{ConfigEntry, ConfigExtension, ConfigField, ExtensionOptions, Visit};
use datafusion_common::{config_namespace, DataFusionError, Result};
use regex::Regex;

/// Row estimate used when a layer cannot report a cheap feature count
pub const DEFAULT_ROW_ESTIMATE: usize = 1000;

/// Fixed cost of opening a layer and issuing the first read
pub const DEFAULT_STARTUP_COST: f64 = 25.0;

config_namespace! {
    /// Configuration options for the OGR bridge.
    pub struct OgrFdwOptions {
        /// Options describing the external datasource
        pub server: OgrServerOptions, default = OgrServerOptions::default()

        /// Options binding a relational table to one layer of the datasource
        pub table: OgrTableOptions, default = OgrTableOptions::default()

        /// Options for row count and cost estimation
        pub planner: OgrPlannerOptions, default = OgrPlannerOptions::default()
    }
}

config_namespace! {
    /// Options describing the external datasource
    pub struct OgrServerOptions {
        /// Datasource connection string handed to the driver manager
        pub datasource: String, default = String::new()

        /// Driver (format) name. When unset every registered driver is tried.
        pub format: Option<String>, default = None

        /// Space separated KEY=VALUE library configuration options
        pub config_options: Option<String>, default = None

        /// Space separated KEY=VALUE driver open options
        pub open_options: Option<String>, default = None

        /// Whether writes through this server are permitted at all
        pub updateable: bool, default = true

        /// Character encoding of attribute values in the datasource
        pub character_encoding: CharacterEncoding, default = CharacterEncoding::Utf8
    }
}

config_namespace! {
    /// Options binding a relational table to one layer of the datasource
    pub struct OgrTableOptions {
        /// Layer name within the datasource
        pub layer: String, default = String::new()

        /// Table level override of the server updateable flag
        pub updateable: Option<bool>, default = None

        /// Relational column carrying the feature id
        pub fid_column: Option<String>, default = None

        /// Relational column carrying the layer geometry
        pub geometry_column: Option<String>, default = None
    }
}

config_namespace! {
    /// Options for row count and cost estimation
    pub struct OgrPlannerOptions {
        /// Row estimate used when the layer has no fast feature count
        pub default_row_estimate: usize, default = DEFAULT_ROW_ESTIMATE

        /// Startup cost of a foreign scan
        pub startup_cost: f64, default = DEFAULT_STARTUP_COST

        /// Ask the layer for a filtered feature count when it advertises a fast one
        pub use_fast_feature_count: bool, default = true
    }
}

impl OgrFdwOptions {
    /// Build options from unprefixed key/value pairs (e.g., `server.datasource`)
    pub fn try_from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            <Self as ConfigField>::set(&mut options, key.as_ref(), value.as_ref())?;
        }
        Ok(options)
    }
}

impl ConfigExtension for OgrFdwOptions {
    const PREFIX: &'static str = "ogr_fdw";
}

impl ExtensionOptions for OgrFdwOptions {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn cloned(&self) -> Box<dyn ExtensionOptions> {
        Box::new(self.clone())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        <Self as ConfigField>::set(self, key, value)
    }

    fn entries(&self) -> Vec<ConfigEntry> {
        struct Visitor(Vec<ConfigEntry>);

        impl Visit for Visitor {
            fn some<V: Display>(&mut self, key: &str, value: V, description: &'static str) {
                self.0.push(ConfigEntry {
                    key: key.to_string(),
                    value: Some(value.to_string()),
                    description,
                })
            }

            fn none(&mut self, key: &str, description: &'static str) {
                self.0.push(ConfigEntry {
                    key: key.to_string(),
                    value: None,
                    description,
                })
            }
        }

        let mut v = Visitor(vec![]);
        self.visit(&mut v, Self::PREFIX, "");
        v.0
    }
}

/// Character encoding of attribute values stored in the external source
///
/// Filter text is always produced as UTF-8. When the source declares another
/// encoding, only literals that are plain ASCII can be sent unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharacterEncoding {
    Utf8,
    Other(String),
}

impl CharacterEncoding {
    pub fn is_utf8(&self) -> bool {
        matches!(self, CharacterEncoding::Utf8)
    }

    /// Resolve the encoding from the `ENCODING=` driver open option, if present
    pub fn from_open_options(open_options: Option<&str>) -> Result<Option<Self>> {
        let Some(open_options) = open_options else {
            return Ok(None);
        };

        for (key, value) in parse_key_value_options(open_options)? {
            if key.eq_ignore_ascii_case("ENCODING") {
                return Ok(Some(Self::from_name(&value)));
            }
        }

        Ok(None)
    }

    fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "utf8" | "utf-8" | "utf_8" => CharacterEncoding::Utf8,
            _ => CharacterEncoding::Other(name.to_string()),
        }
    }
}

impl Display for CharacterEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CharacterEncoding::Utf8 => write!(f, "UTF-8"),
            CharacterEncoding::Other(name) => write!(f, "{name}"),
        }
    }
}

impl ConfigField for CharacterEncoding {
    fn visit<V: Visit>(&self, v: &mut V, key: &str, description: &'static str) {
        v.some(key, self, description);
    }

    fn set(&mut self, _key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            return Err(DataFusionError::Configuration(
                "Character encoding must not be empty".to_string(),
            ));
        }

        *self = Self::from_name(value);
        Ok(())
    }
}

static KEY_VALUE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^([A-Za-z0-9_\-]+)=("[^"]*"|\S*)$"#).unwrap());

/// Parse a space separated list of `KEY=VALUE` pairs
///
/// Values may be wrapped in double quotes, in which case the quotes are removed.
/// This is the format used for both library configuration options and driver
/// open options.
pub fn parse_key_value_options(options: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for token in split_respecting_quotes(options) {
        let Some(captures) = KEY_VALUE_REGEX.captures(&token) else {
            return Err(DataFusionError::Configuration(format!(
                "Invalid option '{token}'. Expected KEY=VALUE"
            )));
        };

        let key = captures[1].to_string();
        let value = captures[2].trim_matches('"').to_string();
        out.push((key, value));
    }

    Ok(out)
}

fn split_respecting_quotes(options: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in options.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}
