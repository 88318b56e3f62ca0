//! Decides whether and how to answer each comment.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use crate::blocklist::BlockCheck;
use crate::message::{Message, MessageClass};
use crate::presets::PresetStore;

/// Why a message was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Duplicate,
    Blocked,
    Backlog,
    System,
    RateLimited,
}

/// Outcome of the eligibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    /// Answer from the template set of this class
    RespondPreset(MessageClass),
    RespondGenerate,
}

impl Decision {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }
}

/// Ids of every message already answered or queued for an answer.
///
/// Lives for the whole process and is never persisted.
#[derive(Debug, Default)]
pub struct DedupSet {
    ids: HashSet<String>,
}

impl DedupSet {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

/// Reply probability shared between the processing loop and the console
#[derive(Debug)]
pub struct ResponseRate(AtomicU64);

impl ResponseRate {
    pub fn new(rate: f64) -> Self {
        Self(AtomicU64::new(rate.clamp(0.0, 1.0).to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Stores the value clamped to [0, 1] and returns what was stored
    pub fn set(&self, rate: f64) -> f64 {
        let rate = rate.clamp(0.0, 1.0);
        self.0.store(rate.to_bits(), Ordering::Relaxed);
        rate
    }
}

pub struct EligibilityFilter {
    dedup: DedupSet,
    blocklist: Arc<dyn BlockCheck>,
    presets: Arc<PresetStore>,
    response_rate: Arc<ResponseRate>,
    history_cutoff_secs: f64,
}

impl std::fmt::Debug for EligibilityFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EligibilityFilter")
            .field("processed", &self.dedup.len())
            .field("response_rate", &self.response_rate.get())
            .field("history_cutoff_secs", &self.history_cutoff_secs)
            .finish()
    }
}

impl EligibilityFilter {
    pub fn new(
        blocklist: Arc<dyn BlockCheck>,
        presets: Arc<PresetStore>,
        response_rate: Arc<ResponseRate>,
        history_cutoff_secs: f64,
    ) -> Self {
        Self {
            dedup: DedupSet::default(),
            blocklist,
            presets,
            response_rate,
            history_cutoff_secs,
        }
    }

    /// Decide how to treat `message`, first matching rule wins.
    ///
    /// `connected_at` is the epoch time of the current stream connection.
    /// Any non-skip decision records the id before returning, so a redelivery
    /// of the same event is skipped even while its reply is still pending.
    pub fn decide<R: Rng + ?Sized>(
        &mut self,
        message: &Message,
        connected_at: f64,
        rng: &mut R,
    ) -> Decision {
        let decision = self.evaluate(message, connected_at, rng);
        if !decision.is_skip() {
            self.dedup.insert(message.id.clone());
        }
        decision
    }

    fn evaluate<R: Rng + ?Sized>(
        &self,
        message: &Message,
        connected_at: f64,
        rng: &mut R,
    ) -> Decision {
        if self.dedup.contains(&message.id) {
            return Decision::Skip(SkipReason::Duplicate);
        }

        if message
            .blockable_sender()
            .is_some_and(|id| self.blocklist.is_blocked(id))
        {
            return Decision::Skip(SkipReason::Blocked);
        }

        if message.timestamp < connected_at + self.history_cutoff_secs {
            return Decision::Skip(SkipReason::Backlog);
        }

        if message.class == MessageClass::System {
            return Decision::Skip(SkipReason::System);
        }

        if let Some(kind) = message.class.preset_kind() {
            if self.presets.has_templates(kind) {
                return Decision::RespondPreset(message.class);
            }
        }

        if rng.random::<f64>() < self.response_rate.get() {
            Decision::RespondGenerate
        } else {
            Decision::Skip(SkipReason::RateLimited)
        }
    }

    pub fn processed_count(&self) -> usize {
        self.dedup.len()
    }

    pub fn clear_history(&mut self) {
        self.dedup.clear();
    }

    pub fn presets(&self) -> &Arc<PresetStore> {
        &self.presets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::PresetSet;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[derive(Default)]
    struct MemoryBlocklist(Mutex<HashSet<String>>);

    impl BlockCheck for MemoryBlocklist {
        fn is_blocked(&self, sender_id: &str) -> bool {
            self.0.lock().contains(sender_id)
        }
    }

    fn message(id: &str, class: MessageClass, ts: f64) -> Message {
        Message {
            id: id.to_string(),
            sender_name: "Alice".to_string(),
            sender_id: Some("v1".to_string()),
            text: "hello".to_string(),
            timestamp: ts,
            class,
            is_self: false,
        }
    }

    fn join_presets() -> Arc<PresetStore> {
        Arc::new(PresetStore::from_sets([(
            "join".to_string(),
            PresetSet {
                description: String::new(),
                replies: vec!["Welcome {username}".to_string()],
            },
        )]))
    }

    fn filter_with(
        blocklist: Arc<MemoryBlocklist>,
        presets: Arc<PresetStore>,
        rate: f64,
    ) -> EligibilityFilter {
        EligibilityFilter::new(blocklist, presets, Arc::new(ResponseRate::new(rate)), 5.0)
    }

    #[test]
    fn test_duplicate_is_skipped() {
        let mut filter = filter_with(Default::default(), join_presets(), 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        let msg = message("m1", MessageClass::User, 2000.0);

        assert_eq!(filter.decide(&msg, 1000.0, &mut rng), Decision::RespondGenerate);
        assert_eq!(
            filter.decide(&msg, 1000.0, &mut rng),
            Decision::Skip(SkipReason::Duplicate)
        );
    }

    #[test]
    fn test_duplicate_of_preset_is_skipped() {
        let mut filter = filter_with(Default::default(), join_presets(), 0.0);
        let mut rng = StdRng::seed_from_u64(7);
        let msg = message("j1", MessageClass::Join, 2000.0);

        assert_eq!(
            filter.decide(&msg, 1000.0, &mut rng),
            Decision::RespondPreset(MessageClass::Join)
        );
        assert!(filter.decide(&msg, 1000.0, &mut rng).is_skip());
    }

    #[test]
    fn test_skipped_message_is_not_recorded() {
        let mut filter = filter_with(Default::default(), join_presets(), 0.0);
        let mut rng = StdRng::seed_from_u64(7);
        let msg = message("m1", MessageClass::User, 2000.0);

        assert_eq!(
            filter.decide(&msg, 1000.0, &mut rng),
            Decision::Skip(SkipReason::RateLimited)
        );
        assert_eq!(filter.processed_count(), 0);
    }

    #[test]
    fn test_blocked_sender_skipped_at_full_rate() {
        let blocklist = Arc::new(MemoryBlocklist::default());
        blocklist.0.lock().insert("v123".to_string());
        let mut filter = filter_with(blocklist, join_presets(), 1.0);
        let mut rng = StdRng::seed_from_u64(7);

        let mut msg = message("m1", MessageClass::User, 2000.0);
        msg.sender_id = Some("v123".to_string());
        assert_eq!(
            filter.decide(&msg, 1000.0, &mut rng),
            Decision::Skip(SkipReason::Blocked)
        );
    }

    #[test]
    fn test_history_cutoff() {
        let mut filter = filter_with(Default::default(), join_presets(), 1.0);
        let mut rng = StdRng::seed_from_u64(7);

        let early = message("early", MessageClass::User, 1002.0);
        assert_eq!(
            filter.decide(&early, 1000.0, &mut rng),
            Decision::Skip(SkipReason::Backlog)
        );

        let later = message("later", MessageClass::User, 1006.0);
        assert_eq!(filter.decide(&later, 1000.0, &mut rng), Decision::RespondGenerate);
    }

    #[test]
    fn test_system_messages_skipped() {
        let mut filter = filter_with(Default::default(), join_presets(), 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        let msg = message("s1", MessageClass::System, 2000.0);
        assert_eq!(
            filter.decide(&msg, 1000.0, &mut rng),
            Decision::Skip(SkipReason::System)
        );
    }

    #[test]
    fn test_join_uses_preset_never_generate() {
        let mut filter = filter_with(Default::default(), join_presets(), 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        let msg = message("j1", MessageClass::Join, 2000.0);
        assert_eq!(
            filter.decide(&msg, 1000.0, &mut rng),
            Decision::RespondPreset(MessageClass::Join)
        );
    }

    #[test]
    fn test_preset_class_without_templates_falls_through() {
        let mut filter = filter_with(Default::default(), join_presets(), 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        let msg = message("l1", MessageClass::Like, 2000.0);
        assert_eq!(filter.decide(&msg, 1000.0, &mut rng), Decision::RespondGenerate);
    }

    #[test]
    fn test_unknown_class_treated_as_user() {
        let mut filter = filter_with(Default::default(), join_presets(), 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        let msg = message("u1", MessageClass::Unknown, 2000.0);
        assert_eq!(filter.decide(&msg, 1000.0, &mut rng), Decision::RespondGenerate);
    }

    #[test]
    fn test_empty_sender_id_is_not_checked() {
        let blocklist = Arc::new(MemoryBlocklist::default());
        blocklist.0.lock().insert(String::new());
        let mut filter = filter_with(blocklist, join_presets(), 1.0);
        let mut rng = StdRng::seed_from_u64(7);

        let mut msg = message("m1", MessageClass::User, 2000.0);
        msg.sender_id = Some(String::new());
        assert_eq!(filter.decide(&msg, 1000.0, &mut rng), Decision::RespondGenerate);
    }

    #[test]
    fn test_response_rate_clamps() {
        let rate = ResponseRate::new(3.0);
        assert_eq!(rate.get(), 1.0);
        assert_eq!(rate.set(-0.5), 0.0);
    }
}
