//! The host classification table: for each evidence category, the sets of
//! hostnames seen on first-party and third-party paths. A hostname may
//! legitimately appear in both sets of one category when it serves both
//! kinds of path; classification is path-sensitive.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostCategory {
    Requests,
    Beacons,
    Cookies,
    LocalStorage,
    Links,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Party {
    First,
    Third,
}

#[derive(Debug, Default)]
struct PartySets {
    first_party: BTreeSet<String>,
    third_party: BTreeSet<String>,
}

impl PartySets {
    fn add(&mut self, party: Party, host: &str) {
        let set = match party {
            Party::First => &mut self.first_party,
            Party::Third => &mut self.third_party,
        };
        set.insert(host.to_string());
    }

    fn to_hosts(&self) -> PartyHosts {
        PartyHosts {
            first_party: self.first_party.iter().cloned().collect(),
            third_party: self.third_party.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Default)]
struct Categories {
    requests: PartySets,
    beacons: PartySets,
    cookies: PartySets,
    local_storage: PartySets,
    links: PartySets,
}

/// Shared accumulation table. Written by the network observer, the link
/// collector and the inspector; serialized once at report time.
#[derive(Debug, Default)]
pub struct HostsTable {
    inner: RwLock<Categories>,
}

impl HostsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, category: HostCategory, party: Party, host: &str) {
        let mut guard = self.inner.write();
        let sets = match category {
            HostCategory::Requests => &mut guard.requests,
            HostCategory::Beacons => &mut guard.beacons,
            HostCategory::Cookies => &mut guard.cookies,
            HostCategory::LocalStorage => &mut guard.local_storage,
            HostCategory::Links => &mut guard.links,
        };
        sets.add(party, host);
    }

    /// Converts the accumulated sets into plain ordered arrays.
    pub fn report(&self) -> HostsReport {
        let guard = self.inner.read();
        HostsReport {
            requests: guard.requests.to_hosts(),
            beacons: guard.beacons.to_hosts(),
            cookies: guard.cookies.to_hosts(),
            local_storage: guard.local_storage.to_hosts(),
            links: guard.links.to_hosts(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyHosts {
    pub first_party: Vec<String>,
    pub third_party: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostsReport {
    pub requests: PartyHosts,
    pub beacons: PartyHosts,
    pub cookies: PartyHosts,
    pub local_storage: PartyHosts,
    pub links: PartyHosts,
}
