//! Admission decisions for a single track.
//!
//! These are plain transition functions over [`BufferState`], the pending
//! queue and the init cache. They decide what may enter the sink next but
//! never talk to the sink themselves; the controller turns their answers
//! into sink operations and signals.

use super::queue::{InitCache, PendingQueue};
use super::state::BufferState;
use super::types::{Quality, Segment};

/// Next step for the media admission path.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Nothing may be admitted right now.
    Wait(WaitReason),
    /// Submit this segment to the sink.
    Append(Segment),
    /// Segment belongs to a superseded quality; complete it without a sink
    /// write.
    Discard(Segment),
    /// The init payload for this quality is not cached yet.
    RequestInit(Quality),
}

/// Why admission is holding back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    OperationInFlight,
    QuotaBlocked,
    AwaitingInit,
    LevelOutrun,
    QueueEmpty,
}

/// Outcome of a successful initialization append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitCompletion {
    /// The payload matched the required quality; media may flow again.
    Satisfied,
    /// A newer quality switch arrived while this payload was in flight.
    Superseded { required: Quality },
}

/// Decides whether the head of the queue may be appended.
///
/// Pops the head segment only when it is admitted or discarded.
pub fn next_media_admission(
    state: &BufferState,
    queue: &mut PendingQueue,
) -> Admission {
    if state.is_operation_in_flight() {
        return Admission::Wait(WaitReason::OperationInFlight);
    }
    if state.quota_exceeded {
        return Admission::Wait(WaitReason::QuotaBlocked);
    }
    if state.awaiting_init() {
        return Admission::Wait(WaitReason::AwaitingInit);
    }
    if state.level_outrun {
        return Admission::Wait(WaitReason::LevelOutrun);
    }

    match queue.pop_front() {
        None => Admission::Wait(WaitReason::QueueEmpty),
        Some(segment) if segment.quality != state.current_quality => Admission::Discard(segment),
        Some(segment) => Admission::Append(segment),
    }
}

/// Decides how to re-prime the sink for the current quality.
///
/// A missing payload is requested regardless of what is in flight; a cached
/// one waits until the sink is free.
pub fn next_init_admission(state: &BufferState, cache: &InitCache) -> Admission {
    let quality = state.current_quality;
    let Some(bytes) = cache.get(quality) else {
        return Admission::RequestInit(quality);
    };
    if state.is_operation_in_flight() {
        return Admission::Wait(WaitReason::OperationInFlight);
    }
    if state.quota_exceeded {
        return Admission::Wait(WaitReason::QuotaBlocked);
    }
    Admission::Append(Segment::init(quality, bytes))
}

/// Records a successfully appended initialization payload.
pub fn complete_init(state: &mut BufferState, quality: Quality) -> InitCompletion {
    match state.required_init_quality {
        Some(required) if required == quality => {
            state.required_init_quality = None;
            InitCompletion::Satisfied
        }
        Some(required) => InitCompletion::Superseded { required },
        None => InitCompletion::Satisfied,
    }
}

/// Records an appended (or discarded) media segment.
///
/// Returns true if this append completed buffering for the track.
pub fn complete_media(state: &mut BufferState, index: u64) -> bool {
    state.record_appended(index);
    check_buffering_complete(state)
}

/// Declares buffering complete once the final segment is in.
///
/// Returns true only on the transition, so the caller signals it once.
pub fn check_buffering_complete(state: &mut BufferState) -> bool {
    if state.buffering_complete {
        return false;
    }
    let complete = match state.last_index {
        None => false,
        // A stream with no media segments is complete once it is announced.
        Some(0) => state.max_appended_index.is_none(),
        Some(last) => state.max_appended_index == Some(last - 1),
    };
    if !complete {
        return false;
    }
    state.buffering_complete = true;
    true
}

/// Puts a quota-rejected segment back at the head of the queue.
///
/// Initialization payloads are not queued: they are replayed from the
/// cache once the track is unblocked, because `required_init_quality` is
/// still set.
pub fn reject_for_quota(state: &mut BufferState, queue: &mut PendingQueue, segment: Segment) {
    state.quota_exceeded = true;
    if !segment.is_init() {
        queue.push_front(segment);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::buffer::state::InFlight;

    fn ready_state(quality: u32) -> BufferState {
        let mut state = BufferState::new(Quality::new(quality), 8.0);
        state.required_init_quality = None;
        state
    }

    fn media(quality: u32, index: u64) -> Segment {
        Segment::media(Quality::new(quality), index, Bytes::from_static(b"data"))
    }

    #[test]
    fn test_idle_state_admits_head() {
        let state = ready_state(1);
        let mut queue = PendingQueue::new();
        queue.push_back(media(1, 0));
        queue.push_back(media(1, 1));

        assert_eq!(
            next_media_admission(&state, &mut queue),
            Admission::Append(media(1, 0))
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_gates_leave_queue_untouched() {
        let mut queue = PendingQueue::new();
        queue.push_back(media(1, 0));

        let mut outrun = ready_state(1);
        outrun.level_outrun = true;
        assert_eq!(
            next_media_admission(&outrun, &mut queue),
            Admission::Wait(WaitReason::LevelOutrun)
        );

        let mut blocked = ready_state(1);
        blocked.quota_exceeded = true;
        assert_eq!(
            next_media_admission(&blocked, &mut queue),
            Admission::Wait(WaitReason::QuotaBlocked)
        );

        let awaiting = BufferState::new(Quality::new(1), 8.0);
        assert_eq!(
            next_media_admission(&awaiting, &mut queue),
            Admission::Wait(WaitReason::AwaitingInit)
        );

        let mut busy = ready_state(1);
        let ticket = busy.issue_ticket();
        busy.in_flight = Some(InFlight::Append {
            ticket,
            segment: media(1, 9),
        });
        assert_eq!(
            next_media_admission(&busy, &mut queue),
            Admission::Wait(WaitReason::OperationInFlight)
        );

        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_stale_quality_is_discarded() {
        let state = ready_state(2);
        let mut queue = PendingQueue::new();
        queue.push_back(media(1, 4));

        assert_eq!(
            next_media_admission(&state, &mut queue),
            Admission::Discard(media(1, 4))
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_init_admission_requests_missing_payload() {
        let state = BufferState::new(Quality::new(3), 8.0);
        let cache = InitCache::new();
        assert_eq!(
            next_init_admission(&state, &cache),
            Admission::RequestInit(Quality::new(3))
        );
    }

    #[test]
    fn test_init_admission_defers_while_busy() {
        let mut state = BufferState::new(Quality::new(3), 8.0);
        let mut cache = InitCache::new();
        cache.insert(Quality::new(3), Bytes::from_static(b"init"));

        let ticket = state.issue_ticket();
        state.in_flight = Some(InFlight::Append {
            ticket,
            segment: media(2, 0),
        });
        assert_eq!(
            next_init_admission(&state, &cache),
            Admission::Wait(WaitReason::OperationInFlight)
        );

        state.in_flight = None;
        assert_eq!(
            next_init_admission(&state, &cache),
            Admission::Append(Segment::init(Quality::new(3), Bytes::from_static(b"init")))
        );
    }

    #[test]
    fn test_complete_init_detects_superseded_switch() {
        let mut state = BufferState::new(Quality::new(3), 8.0);

        assert_eq!(
            complete_init(&mut state, Quality::new(2)),
            InitCompletion::Superseded {
                required: Quality::new(3)
            }
        );
        assert_eq!(state.required_init_quality, Some(Quality::new(3)));

        assert_eq!(
            complete_init(&mut state, Quality::new(3)),
            InitCompletion::Satisfied
        );
        assert_eq!(state.required_init_quality, None);
    }

    #[test]
    fn test_buffering_completes_exactly_once() {
        let mut state = ready_state(0);
        state.last_index = Some(10);

        assert!(!complete_media(&mut state, 8));
        assert!(complete_media(&mut state, 9));
        assert!(state.buffering_complete);
        assert!(!complete_media(&mut state, 9));
        assert!(!check_buffering_complete(&mut state));
    }

    #[test]
    fn test_buffering_waits_for_terminal_index() {
        let mut state = ready_state(0);
        assert!(!complete_media(&mut state, 9));

        state.last_index = Some(10);
        assert!(check_buffering_complete(&mut state));
    }

    #[test]
    fn test_empty_stream_completes_immediately() {
        let mut state = ready_state(0);
        state.last_index = Some(0);
        assert!(check_buffering_complete(&mut state));
        assert!(!check_buffering_complete(&mut state));
    }

    #[test]
    fn test_quota_rejection_requeues_media_only() {
        let mut state = ready_state(1);
        let mut queue = PendingQueue::new();
        queue.push_back(media(1, 6));

        reject_for_quota(&mut state, &mut queue, media(1, 5));
        assert!(state.quota_exceeded);
        assert_eq!(queue.front().and_then(|s| s.index), Some(5));

        reject_for_quota(
            &mut state,
            &mut queue,
            Segment::init(Quality::new(1), Bytes::new()),
        );
        assert_eq!(queue.len(), 2);
    }
}
