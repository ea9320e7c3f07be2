use super::*;
use jsonwebtoken::{decode, DecodingKey, Validation};

#[test]
fn room_name_is_stable_for_a_call() {
    let id = CallId::new();
    assert_eq!(room_name_for_call(id), room_name_for_call(id));
    assert!(room_name_for_call(id).starts_with("call-"));
    assert_ne!(room_name_for_call(id), room_name_for_call(CallId::new()));
}

#[test]
fn token_claims_contain_room_and_subject() {
    let cfg = CallTokenConfig {
        api_key: "devkey".into(),
        api_secret: "devsecret".into(),
        ttl_seconds: 60,
    };
    let room = room_name_for_call(CallId::new());
    let token = mint_token(&cfg, UserId(7), &room).expect("token");

    let decoded = decode::<serde_json::Value>(
        &token,
        &DecodingKey::from_secret(cfg.api_secret.as_bytes()),
        &Validation::default(),
    )
    .expect("decode");

    assert_eq!(decoded.claims["iss"], "devkey");
    assert_eq!(decoded.claims["sub"], "user:7");
    assert_eq!(decoded.claims["video"]["room"], room.as_str());
    assert_eq!(decoded.claims["video"]["roomJoin"], true);
}
