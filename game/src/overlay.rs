use engine::clock::Millis;
use engine::layout::PixelPoint;

use crate::model::{MISS_TTL, MissId, MissMarker, Region};

/// Transient click feedback for one stage: confirmed finds and short-lived misses.
///
/// Finds are replaced wholesale from each server reply; the server is the only source of
/// truth for them. Misses are keyed by insertion id, so two misses on the same pixel
/// expire independently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    found: Vec<Region>,
    misses: Vec<MissMarker>,
    next_miss: u64,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn found(&self) -> &[Region] {
        &self.found
    }

    /// Installs the server's found set. Returns whether anything changed.
    pub fn replace_found(&mut self, regions: Vec<Region>) -> bool {
        if self.found == regions {
            return false;
        }
        self.found = regions;
        true
    }

    pub fn add_miss(&mut self, at: PixelPoint, now: Millis) -> MissId {
        let id = MissId(self.next_miss);
        self.next_miss += 1;
        self.misses.push(MissMarker {
            id,
            at,
            expires_at: now.saturating_add(MISS_TTL),
        });
        id
    }

    /// Drops expired misses. Returns how many were removed.
    pub fn prune(&mut self, now: Millis) -> usize {
        let before = self.misses.len();
        self.misses.retain(|m| m.is_visible(now));
        before - self.misses.len()
    }

    pub fn visible_misses(&self, now: Millis) -> impl Iterator<Item = &MissMarker> + '_ {
        self.misses.iter().filter(move |m| m.is_visible(now))
    }

    pub fn clear(&mut self) {
        self.found.clear();
        self.misses.clear();
    }
}
