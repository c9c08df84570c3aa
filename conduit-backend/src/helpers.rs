use rand::distr::{Alphanumeric, SampleString};
use rand::rng;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn generate_api_token() -> String {
  format!("conduit-sk-{}", Alphanumeric.sample_string(&mut rng(), 40))
}

pub fn generate_server_token() -> String {
  format!("conduit-st-{}", Alphanumeric.sample_string(&mut rng(), 40))
}

pub fn hash_api_token(token: &str) -> String {
  format!("{:x}", Sha256::digest(token.as_bytes()))
}

pub fn now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap()
    .as_secs() as i64
}

pub fn now_millis() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap()
    .as_millis() as i64
}

/// Avatar URL for a Minecraft UUID (dashes stripped, lowercased).
pub fn avatar_url(uuid: &str) -> String {
  if uuid.is_empty() {
    return String::new();
  }
  let clean = uuid.replace('-', "").to_lowercase();
  format!("https://mc-heads.net/avatar/{clean}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_avatar_url_normalizes_uuid() {
    assert_eq!(
      avatar_url("069A79F4-44E9-4726-A5BE-FCA90E38AAF5"),
      "https://mc-heads.net/avatar/069a79f444e94726a5befca90e38aaf5"
    );
    assert_eq!(avatar_url(""), "");
  }

  #[test]
  fn test_generated_tokens_fit_packet_bounds() {
    // Server tokens travel in packet envelopes, which require 32-64 chars.
    let token = generate_server_token();
    assert!(token.len() >= 32 && token.len() <= 64);
  }
}
