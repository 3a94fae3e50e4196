// Copyright 2025 Cornell University
// released under MIT License

//! Links every dispatch to the receives of the same name across a collection.

use rustc_hash::FxHashMap;

use crate::ir::{Action, ActionId, ProcessCollection, ProcessId, SignalKind};

/// One end of a peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Peer {
    pub process: ProcessId,
    pub action: ActionId,
}

/// Symmetric and read-only once built. Lists are ordered by collection order,
/// then by action creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerIndex {
    links: FxHashMap<Peer, Vec<Peer>>,
}

impl PeerIndex {
    pub fn peers(&self, process: ProcessId, action: ActionId) -> &[Peer] {
        self.links
            .get(&Peer { process, action })
            .map(|peers| peers.as_slice())
            .unwrap_or_default()
    }

    /// Number of dispatch/receive pairs
    pub fn link_count(&self) -> usize {
        self.links.values().map(|peers| peers.len()).sum::<usize>() / 2
    }

    fn link(&mut self, dispatch: Peer, receive: Peer) {
        self.links.entry(dispatch).or_default().push(receive);
        self.links.entry(receive).or_default().push(dispatch);
    }
}

impl ProcessCollection {
    /// Computes the complete peer relation. Must run after the last process has
    /// been added and before any automaton is translated.
    pub fn establish_peers(&mut self) -> &PeerIndex {
        let ordered = self.ordered();
        let mut receivers: FxHashMap<&str, Vec<Peer>> = FxHashMap::default();
        for &process in ordered.iter() {
            for (action, receive) in self[process].named_actions() {
                if let Action::Receive(receive) = receive {
                    receivers
                        .entry(receive.attrs.name.as_str())
                        .or_default()
                        .push(Peer { process, action });
                }
            }
        }

        let mut index = PeerIndex::default();
        for &process in ordered.iter() {
            for (action, dispatch) in self[process].named_actions() {
                let Action::Dispatch(d) = dispatch else {
                    continue;
                };
                // callback invocations do not rendezvous
                if dispatch.signal_kind() == Some(SignalKind::Call) {
                    continue;
                }
                let candidates = receivers.get(d.attrs.name.as_str());
                for receive in candidates.into_iter().flatten() {
                    index.link(Peer { process, action }, *receive);
                }
                if candidates.is_none() {
                    log::debug!(
                        "dispatch `{}` of `{}` has no receivers",
                        d.attrs.name,
                        self[process].name
                    );
                }
            }
        }
        log::info!(
            "established {} peer links across {} processes",
            index.link_count(),
            ordered.len()
        );
        self.peers.insert(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Callback, Process};

    fn collection() -> ProcessCollection {
        let mut collection = ProcessCollection::new();
        collection
            .set_entry(Process::from_dsl("a", "test", "<init>.[sig]").unwrap())
            .unwrap();
        collection
            .add_model(Process::from_dsl("b", "test", "(sig).<done>").unwrap())
            .unwrap();
        collection
            .add_environment(Process::from_dsl("c", "test", "(!sig) | [other]").unwrap())
            .unwrap();
        collection
    }

    #[test]
    fn links_are_symmetric() {
        let mut collection = collection();
        let a = collection.by_name("a").unwrap();
        let b = collection.by_name("b").unwrap();
        let c = collection.by_name("c").unwrap();
        let sig_a = collection[a].action_id("sig").unwrap();
        let sig_b = collection[b].action_id("sig").unwrap();
        let sig_c = collection[c].action_id("sig").unwrap();

        let peers = collection.establish_peers();
        assert_eq!(
            peers.peers(a, sig_a),
            &[
                Peer {
                    process: b,
                    action: sig_b
                },
                Peer {
                    process: c,
                    action: sig_c
                }
            ]
        );
        assert_eq!(
            peers.peers(b, sig_b),
            &[Peer {
                process: a,
                action: sig_a
            }]
        );
        assert_eq!(
            peers.peers(c, sig_c),
            &[Peer {
                process: a,
                action: sig_a
            }]
        );
        assert_eq!(peers.link_count(), 2);
    }

    #[test]
    fn unmatched_signals_have_no_peers() {
        let mut collection = collection();
        let c = collection.by_name("c").unwrap();
        let other = collection[c].action_id("other").unwrap();
        let peers = collection.establish_peers();
        assert!(peers.peers(c, other).is_empty());
    }

    #[test]
    fn adding_a_process_invalidates_peers() {
        let mut collection = collection();
        collection.establish_peers();
        assert!(collection.peers().is_some());
        collection
            .add_environment(Process::from_dsl("d", "test", "(sig)").unwrap())
            .unwrap();
        assert!(collection.peers().is_none());
        assert_eq!(collection.establish_peers().link_count(), 3);
    }

    #[test]
    fn callback_invocations_are_not_linked() {
        let mut caller = Process::from_dsl("caller", "test", "[probe]").unwrap();
        let probe = caller.action_id("probe").unwrap();
        if let Action::Dispatch(d) = caller.action_mut(probe) {
            d.callback = Some(Callback {
                target: "%cb%".to_string(),
                retval: None,
            });
        }
        let mut collection = ProcessCollection::new();
        collection.set_entry(caller).unwrap();
        collection
            .add_model(Process::from_dsl("callee", "test", "(probe)").unwrap())
            .unwrap();
        assert_eq!(collection.establish_peers().link_count(), 0);
    }
}
