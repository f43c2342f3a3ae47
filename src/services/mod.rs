// Collaborator seams
pub mod catalog;
pub mod gateway;

// Transaction core
pub mod order_items;
pub mod orders;
pub mod payments;

/// Paging limits shared by the search operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSettings {
    pub default_size: u64,
    pub max_size: u64,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            default_size: 10,
            max_size: 100,
        }
    }
}

impl PageSettings {
    /// Zero-based page and clamped page size. Missing or negative pages fall
    /// back to the first page, missing or non-positive sizes to the default.
    pub fn normalize(&self, page: Option<i64>, size: Option<i64>) -> (u64, u64) {
        let page = page.filter(|p| *p >= 0).unwrap_or(0) as u64;
        let size = match size {
            Some(s) if s >= 1 => (s as u64).min(self.max_size),
            _ => self.default_size,
        };
        (page, size)
    }
}

pub(crate) fn total_pages(total: u64, size: u64) -> u64 {
    if size == 0 {
        0
    } else {
        total.div_ceil(size)
    }
}
