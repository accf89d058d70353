use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Overlap duration of two spans in milliseconds. Zero or negative means
/// no overlap (negative is the gap between them).
pub fn overlap_ms(a: &Span, b: &Span) -> Ms {
    a.end.min(b.end) - a.start.max(b.start)
}

/// The span widened by the grace allowance at both ends. Anything outside
/// this window cannot conflict with it.
fn grace_window(span: &Span, grace_ms: Ms) -> Span {
    Span {
        start: span.start - grace_ms,
        end: span.end + grace_ms,
    }
}

/// Whether `a`, widened by `grace_ms` at both ends, strictly intersects `b`.
/// Spans that merely touch (or sit within the grace distance of each other
/// without it) do not count.
pub fn grace_overlaps(a: &Span, b: &Span, grace_ms: Ms) -> bool {
    grace_window(a, grace_ms).overlaps(b)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.end <= span.start {
        return Err(EngineError::InvalidSpan("end must be after start"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_priority(priority: u8) -> Result<(), EngineError> {
    use crate::limits::*;
    if !(MIN_PRIORITY_LEVEL..=MAX_PRIORITY_LEVEL).contains(&priority) {
        return Err(EngineError::InvalidPriority(priority));
    }
    Ok(())
}

pub(crate) fn validate_grace(grace_ms: Ms) -> Result<(), EngineError> {
    if !(0..=crate::limits::MAX_GRACE_MS).contains(&grace_ms) {
        return Err(EngineError::InvalidGrace(grace_ms));
    }
    Ok(())
}

/// First live schedule in `record`'s priority band whose overlap with it
/// exceeds the grace allowance. `None` means the record can land as-is.
pub(crate) fn first_conflict(
    ts: &TeamState,
    record: &OnCallSchedule,
    grace_ms: Ms,
) -> Option<Ulid> {
    let window = grace_window(&record.span, grace_ms);
    ts.overlapping(record.priority, &window)
        .filter(|c| c.id != record.id && !c.is_deleted())
        .find(|c| overlap_ms(&record.span, &c.span) > grace_ms)
        .map(|c| c.id)
}

/// Plan automatic conflict resolution for a submitted schedule.
///
/// Walks the live schedules in the record's priority band in ascending start
/// order and decides, per conflicting candidate, whether to truncate it,
/// tombstone it, or push the submitted span's start past it. Newer data wins:
/// existing coverage yields to the record being written.
///
/// Returns the repair events plus the (possibly shifted) span the record
/// should land with. Fails with `Conflict` only when the pushes squeeze the
/// submitted span to nothing.
pub(crate) fn plan_resolution(
    ts: &TeamState,
    record: &OnCallSchedule,
    grace_ms: Ms,
    now: Ms,
) -> Result<(Vec<Event>, Span), EngineError> {
    let window = grace_window(&record.span, grace_ms);
    let candidates: Vec<OnCallSchedule> = ts
        .overlapping(record.priority, &window)
        .filter(|c| c.id != record.id && !c.is_deleted())
        .cloned()
        .collect();

    let mut events = Vec::new();
    let mut cur = record.span;
    let mut last_push = None;

    for c in &candidates {
        // Within the grace allowance of the ORIGINAL submission: tolerated.
        if overlap_ms(&record.span, &c.span) <= grace_ms {
            continue;
        }
        if c.span.start < cur.start && cur.start < c.span.end && c.span.end < cur.end {
            // Trailing edge reaches into the new span: cut it back to just
            // before the new start, or tombstone it if nothing would remain.
            let end = cur.start - 1;
            if end <= c.span.start {
                events.push(Event::ScheduleTombstoned {
                    id: c.id,
                    team_id: record.team_id,
                    at: now,
                });
            } else {
                events.push(Event::ScheduleTruncated {
                    id: c.id,
                    team_id: record.team_id,
                    end,
                });
            }
        } else if c.span.start < cur.start && cur.start < c.span.end && c.span.end > cur.end {
            // Candidate covers the new start and runs past the new end: the
            // new span starts after it instead.
            cur.start = c.span.end + 1;
            last_push = Some(c.id);
        } else if c.span.start < cur.start {
            // Entirely behind the (shifted) start: superseded coverage.
            events.push(Event::ScheduleTombstoned {
                id: c.id,
                team_id: record.team_id,
                at: now,
            });
        } else {
            // Candidate starts at or after the new start: push past it.
            cur.start = c.span.end + 1;
            last_push = Some(c.id);
        }
    }

    if cur.start >= cur.end {
        let id = last_push.expect("span inversion implies a prior push");
        return Err(EngineError::Conflict(id));
    }
    Ok((events, cur))
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = 60_000; // 1 minute in ms

    #[test]
    fn overlap_duration() {
        let a = Span::new(0, 100);
        assert_eq!(overlap_ms(&a, &Span::new(50, 150)), 50);
        assert_eq!(overlap_ms(&a, &Span::new(100, 200)), 0); // adjacent
        assert_eq!(overlap_ms(&a, &Span::new(130, 200)), -30); // gap of 30
    }

    #[test]
    fn grace_overlap_boundaries() {
        let a = Span::new(10 * M, 20 * M);
        // Gap smaller than grace: within the window.
        assert!(grace_overlaps(&a, &Span::new(22 * M, 30 * M), 5 * M));
        // Gap exactly grace: window edges touch, no strict intersection.
        assert!(!grace_overlaps(&a, &Span::new(25 * M, 30 * M), 5 * M));
        // Zero grace degenerates to plain overlap.
        assert!(!grace_overlaps(&a, &Span::new(20 * M, 30 * M), 0));
        assert!(grace_overlaps(&a, &Span::new(19 * M, 30 * M), 0));
    }

    #[test]
    fn span_validation() {
        assert!(validate_span(&Span { start: 100, end: 100 }).is_err());
        assert!(validate_span(&Span { start: 200, end: 100 }).is_err());
        assert!(validate_span(&Span::new(100, 200)).is_ok());
        assert!(validate_span(&Span { start: -5, end: 100 }).is_err());
    }

    #[test]
    fn priority_validation() {
        assert!(validate_priority(0).is_err());
        assert!(validate_priority(1).is_ok());
        assert!(validate_priority(10).is_ok());
        assert!(validate_priority(11).is_err());
    }

    #[test]
    fn grace_validation() {
        assert!(validate_grace(0).is_ok());
        assert!(validate_grace(5 * M).is_ok());
        assert!(validate_grace(-1).is_err());
        assert!(validate_grace(crate::limits::MAX_GRACE_MS + 1).is_err());
    }
}
