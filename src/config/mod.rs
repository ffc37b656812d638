pub mod persona;

use std::time::Duration;

use crate::cli::Args;
use crate::llm::{ LlmConfig, LlmType };

/// Settings the HTTP layer needs, resolved once from the command line and environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub max_body_bytes: usize,
    pub rate_limit_per_second: u32,
    pub expose_error_details: bool,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

impl ServerConfig {
    pub fn from_args(args: &Args) -> Result<Self, String> {
        let tls = if args.enable_tls {
            match (&args.tls_cert_path, &args.tls_key_path) {
                (Some(cert_path), Some(key_path)) =>
                    Some(TlsConfig {
                        cert_path: cert_path.clone(),
                        key_path: key_path.clone(),
                    }),
                _ => {
                    return Err(
                        "Both --tls-cert-path and --tls-key-path must be provided to enable TLS.".into()
                    );
                }
            }
        } else {
            None
        };

        Ok(Self {
            addr: args.server_addr.clone(),
            max_body_bytes: args.max_body_bytes,
            rate_limit_per_second: args.rate_limit_per_second,
            expose_error_details: args.debug,
            tls,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4000".into(),
            max_body_bytes: 1024 * 1024,
            rate_limit_per_second: 10,
            expose_error_details: false,
            tls: None,
        }
    }
}

pub fn llm_config_from_args(args: &Args) -> Result<LlmConfig, String> {
    let llm_type: LlmType = args.chat_llm_type.parse().map_err(|e| format!("{}", e))?;
    Ok(LlmConfig {
        llm_type,
        api_key: Some(args.chat_api_key.clone()).filter(|k| !k.trim().is_empty()),
        completion_model: args.chat_model.clone(),
        base_url: args.chat_base_url.clone(),
        timeout: Duration::from_secs(args.upstream_timeout_secs),
    })
}
