//! In-memory ring of recent request records, exposed to read consumers
//! (the `/api/logs/stream` and `/api/logs/history` routes) without
//! touching the durable store on every poll.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::RequestRecord;

pub struct RequestLog {
    capacity: usize,
    records: Mutex<VecDeque<RequestRecord>>,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a record, evicting the oldest entry once `capacity` is
    /// exceeded.
    pub fn push(&self, record: RequestRecord) {
        let mut records = self.records.lock().expect("request log mutex poisoned");
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Most recent `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<RequestRecord> {
        let records = self.records.lock().expect("request log mutex poisoned");
        records.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("request log mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every buffered record. Durable history is untouched; this
    /// only resets the in-memory view `/api/stats/reset` exposes.
    pub fn clear(&self) {
        self.records.lock().expect("request log mutex poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> RequestRecord {
        RequestRecord {
            id: id.to_string(),
            timestamp: 0,
            method: "GET".to_string(),
            path: "/v1/messages".to_string(),
            account_used: None,
            status_code: Some(200),
            success: true,
            error_message: None,
            response_time_ms: Some(10),
            failover_attempts: 0,
            model: None,
            input_tokens: None,
            output_tokens: None,
            cache_read_input_tokens: None,
            cache_creation_input_tokens: None,
            total_tokens: None,
            cost_usd: None,
            output_tokens_per_second: None,
            agent_used: None,
        }
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let log = RequestLog::new(2);
        log.push(record("r1"));
        log.push(record("r2"));
        log.push(record("r3"));
        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "r3");
        assert_eq!(recent[1].id, "r2");
    }

    #[test]
    fn recent_respects_limit() {
        let log = RequestLog::new(10);
        for id in ["r1", "r2", "r3"] {
            log.push(record(id));
        }
        assert_eq!(log.recent(1).len(), 1);
        assert_eq!(log.recent(1)[0].id, "r3");
    }

    #[test]
    fn clear_empties_the_buffer() {
        let log = RequestLog::new(10);
        log.push(record("r1"));
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.recent(10).len(), 0);
    }
}
