//! Call and server configuration.

use crate::error::CallError;
use crate::peer::types::ServerConfig;
use crate::utils::add_ice_url_scheme;
use std::path::PathBuf;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;

pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Transport configuration for one call attempt.
#[derive(Clone, Debug)]
pub struct CallConfig {
    pub ice_servers: Vec<ServerConfig>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
        }
    }
}

impl CallConfig {
    /// Rejects empty URLs and TURN entries without credentials.
    pub fn validate(&self) -> Result<(), CallError> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(CallError::InvalidIceServer(format!(
                    "server \"{}\" has an empty URL",
                    server.id
                )));
            }
            if server.r#type == "turn"
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(CallError::InvalidIceServer(format!(
                    "TURN server \"{}\" requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn rtc_config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: to_rtc_ice_servers(&self.ice_servers),
            ice_candidate_pool_size: 10,
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
            ..Default::default()
        }
    }
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-2".into(),
            r#type: "stun".into(),
            url: "stun:stun2.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

pub fn to_rtc_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Static asset server configuration.
#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub port: u16,
    pub bind_addr: String,
    pub public_dir: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
            bind_addr: "0.0.0.0".to_string(),
            public_dir: PathBuf::from("public"),
        }
    }
}
