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

/// Macro to create an OGR bridge internal error that avoids the misleading error
/// message from DataFusionError::Internal.
#[macro_export]
macro_rules! ogr_internal_err {
    ($($args:expr),*) => {{
        let msg = std::format!(
            "Sedona OGR internal error: {}{}.\nThis issue was likely caused by a bug in the OGR bridge. \
            Please help us to resolve this by filing a bug report in our issue tracker: \
            https://github.com/apache/sedona-db/issues",
            std::format!($($args),*),
            datafusion_common::DataFusionError::get_back_trace(),
        );
        Err(datafusion_common::DataFusionError::External(msg.into()))
    }};
}

/// Macro to create a configuration error raised while binding a foreign table
/// to an OGR layer
///
/// These errors are fatal to operation setup and are reported before any scan
/// starts.
#[macro_export]
macro_rules! ogr_config_err {
    ($($args:expr),*) => {{
        Err(datafusion_common::DataFusionError::Configuration(std::format!($($args),*)))
    }};
}
