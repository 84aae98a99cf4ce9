use peergroup_protocol::{DecodedName, NameCodec};
use peergroup_transport::SessionPort;
use proptest::prelude::*;

fn group_name() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_][A-Za-z0-9_. -]{0,24}"
}

proptest! {
    /// Encoded names always decode back to the same group and port.
    #[test]
    fn encode_decode_roundtrip(name in group_name(), port in 1..=u16::MAX) {
        let codec = NameCodec::new("org.test");
        let encoded = codec.encode(&name, SessionPort(port));
        prop_assert_eq!(
            codec.decode(&encoded),
            DecodedName::Conforming { group_name: name, port }
        );
    }

    /// Names outside the prefix are legacy and keep their full text.
    #[test]
    fn foreign_names_are_legacy(name in "[a-z]{1,8}(\\.[a-z0-9]{1,8}){0,3}") {
        let codec = NameCodec::new("org.test");
        prop_assume!(!name.starts_with("org.test."));
        prop_assert_eq!(
            codec.decode(&name),
            DecodedName::Legacy { group_name: name.clone() }
        );
    }

    /// Decoding never panics and always yields a group name.
    #[test]
    fn decode_is_total(name in "\\PC{0,40}") {
        let codec = NameCodec::new("org.test");
        let decoded = codec.decode(&name);
        if let Some(port) = decoded.port() {
            prop_assert!(port.is_valid());
            prop_assert!(!decoded.group_name().is_empty());
        }
    }

    /// Whatever decodes as conforming encodes back to the exact same text,
    /// so padded or signed ports never pass as conforming.
    #[test]
    fn conforming_names_are_canonical(
        group in "[a-z]{1,6}",
        port in "[+0-9]{1,7}",
    ) {
        let codec = NameCodec::new("org.test");
        let name = format!("org.test.{group}.{port}");
        if let Some(decoded_port) = codec.decode(&name).port() {
            prop_assert_eq!(codec.encode(&group, decoded_port), name);
        }
    }
}
