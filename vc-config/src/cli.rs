//! Command-line arguments for the VideoCatalog service: a clap derive
//! struct with an `env` fallback for every flag. This service has no
//! `axum-server`/`rustls` layer, so there is no TLS cert/key pair here
//! (see DESIGN.md).

use std::path::PathBuf;

use clap::Parser;

use crate::loader::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(name = "videocatalog-server", about = "VideoCatalog read API and orchestrator")]
pub struct Args {
    /// Working directory root (overrides the usual resolution order)
    #[arg(long, env = "VIDEOCATALOG_HOME")]
    pub working_dir: Option<PathBuf>,

    /// Server port (overrides settings.json)
    #[arg(short, long, env = "SERVER_PORT")]
    pub port: Option<u16>,

    /// Server host (overrides settings.json)
    #[arg(long, env = "SERVER_HOST")]
    pub host: Option<String>,

    /// Static API key (overrides settings.json; also read from VIDEOCATALOG_API_KEY)
    #[arg(long, env = "VIDEOCATALOG_API_KEY")]
    pub api_key: Option<String>,
}

impl Args {
    pub fn to_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            api_key: self.api_key.clone(),
        }
    }
}
