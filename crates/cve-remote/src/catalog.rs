use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

/// How many successful batches are served between each injected rate-limit signal, exercising
/// the session controller's exponential back-off path (§4.H, §4.G).
const RATE_LIMIT_EVERY: u64 = 4;

/// A stand-in upstream catalog: generates deterministic synthetic CVE records rather than
/// calling a real external API, per §4.H ("none of these invent a real external protocol").
pub struct RemoteCatalog {
    calls: AtomicU64,
}

impl RemoteCatalog {
    pub fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
        }
    }

    /// Returns `true` on every `RATE_LIMIT_EVERY`th call, simulating an upstream rate limit.
    pub fn should_rate_limit(&self) -> bool {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        call > 0 && call % RATE_LIMIT_EVERY == 0
    }

    pub fn page(&self, start_index: u64, count: u32) -> Vec<Value> {
        (0..count as u64)
            .map(|offset| synthesize(start_index + offset))
            .collect()
    }
}

fn synthesize(index: u64) -> Value {
    let severities = ["low", "medium", "high", "critical"];
    json!({
        "cve_id": format!("CVE-2024-{:05}", index),
        "severity": severities[(index % severities.len() as u64) as usize],
        "summary": format!("Synthetic demonstration record #{index}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_deterministic_and_sequential() {
        let catalog = RemoteCatalog::new();
        let page = catalog.page(10, 3);
        assert_eq!(page.len(), 3);
        assert_eq!(page[0]["cve_id"], "CVE-2024-00010");
        assert_eq!(page[2]["cve_id"], "CVE-2024-00012");
    }

    #[test]
    fn rate_limit_fires_on_every_nth_call() {
        let catalog = RemoteCatalog::new();
        let signals: Vec<bool> = (0..8).map(|_| catalog.should_rate_limit()).collect();
        assert_eq!(signals, vec![false, false, false, false, true, false, false, false]);
    }
}
