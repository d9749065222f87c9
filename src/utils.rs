use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Prepends the protocol scheme to an ICE server URL when it is missing.
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:") || config.url.starts_with("stun:") {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_unique_hex() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn scheme_added_only_when_missing() {
        let stun = ServerConfig {
            id: "s".into(),
            r#type: "stun".into(),
            url: "stun.example.org:3478".into(),
            username: None,
            credential: None,
        };
        assert_eq!(add_ice_url_scheme(&stun), "stun:stun.example.org:3478");

        let turn = ServerConfig {
            id: "t".into(),
            r#type: "turn".into(),
            url: "turn:turn.example.org:3478".into(),
            username: Some("u".into()),
            credential: Some("c".into()),
        };
        assert_eq!(add_ice_url_scheme(&turn), "turn:turn.example.org:3478");
    }
}
