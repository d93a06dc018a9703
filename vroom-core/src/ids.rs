use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 21-character nanoid
pub fn generate_id() -> String {
    nanoid!()
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Opaque token identifying a signaling peer
    PeerId
);

string_id!(
    /// Handle of a client signaling connection, used to address outbound pushes
    TransportId
);

string_id!(
    /// Media server id as announced in the `node` field of its envelopes
    ServerId
);

string_id!(
    /// Room name chosen by clients
    RoomName
);

impl PeerId {
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_id())
    }
}

impl TransportId {
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_eq!(a.as_str().len(), 21);
        assert_ne!(a, b);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = ServerId::from("egress-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"egress-1\"");
        let back: ServerId = serde_json::from_str("\"egress-1\"").unwrap();
        assert_eq!(back, id);
    }
}
