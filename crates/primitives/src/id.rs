//! Opaque string identifiers.
//!
//! Every entity is keyed by an opaque string id. Fresh ids are minted from
//! UUIDv4 but the type accepts any caller-supplied string, so external
//! systems can bring their own identifiers.

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mints a fresh random identifier.
            pub fn random() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

opaque_id!(AccountId);
opaque_id!(FunctionId);
opaque_id!(ExecutionId);
opaque_id!(ActionId);
opaque_id!(JobId);
opaque_id!(TriggerId);
opaque_id!(SourceId);
opaque_id!(RequestId);
opaque_id!(GasAccountId);
opaque_id!(GasTxId);
opaque_id!(FeedId);
opaque_id!(UpdateId);
opaque_id!(SecretId);
