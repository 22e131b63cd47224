//! Conversation channel addressing.
//!
//! A private channel is keyed by the unordered identity pair: both sides
//! derive the same id locally, with no server round trip. The public room is
//! a distinct well-known channel; pair ids always contain the `_` separator
//! between two identity ids, so the two namespaces cannot collide.

use std::fmt;

use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// The single public room.
    Public,
    /// A pairwise channel, keyed `sorted(a, b).join("_")`.
    Direct(String),
}

impl ChannelId {
    /// Commutative and deterministic: `direct(a, b) == direct(b, a)`.
    pub fn direct(a: Uuid, b: Uuid) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        ChannelId::Direct(format!("{lo}_{hi}"))
    }

    /// Message collection path for this channel.
    pub fn collection(&self, config: &AppConfig) -> String {
        match self {
            ChannelId::Public => config.public_collection.clone(),
            ChannelId::Direct(pair) => format!("{}/{}/messages", config.private_root, pair),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Public => f.write_str("public"),
            ChannelId::Direct(pair) => f.write_str(pair),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_is_commutative() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(ChannelId::direct(a, b), ChannelId::direct(b, a));
    }

    #[test]
    fn self_channel_is_well_defined() {
        let a = Uuid::new_v4();
        let id = ChannelId::direct(a, a);
        assert_eq!(id, ChannelId::Direct(format!("{a}_{a}")));
        assert_ne!(id, ChannelId::Public);
    }

    #[test]
    fn distinct_pairs_get_distinct_channels() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert_ne!(ChannelId::direct(a, b), ChannelId::direct(a, c));
    }

    #[test]
    fn collection_paths() {
        let config = AppConfig::test_default();
        assert_eq!(ChannelId::Public.collection(&config), "messages");

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ChannelId::Direct(pair) = ChannelId::direct(a, b) else {
            unreachable!()
        };
        assert_eq!(
            ChannelId::direct(a, b).collection(&config),
            format!("privateMessages/{pair}/messages")
        );
    }
}
