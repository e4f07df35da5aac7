//! Pagination clamping and the `{results, limit, offset, next_offset?,
//! total_estimate?}` envelope shared by every Read API listing
//! operation. Spec §4.4.

use serde::Serialize;

pub const COUNT_GUARD: i64 = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    /// Clamp raw user input to `[1, max_page_size]` for limit and
    /// `[0, inf)` for offset, substituting `default_limit` when the
    /// caller omits `limit`.
    pub fn resolve(
        limit: Option<i64>,
        offset: Option<i64>,
        default_limit: i64,
        max_page_size: i64,
    ) -> Self {
        let requested = limit.unwrap_or(default_limit);
        let clamped_limit = requested.clamp(1, max_page_size.max(1));
        let clamped_offset = offset.unwrap_or(0).max(0);
        Self {
            limit: clamped_limit,
            offset: clamped_offset,
        }
    }

    /// SQL `LIMIT` value: one more row than requested, so callers can
    /// detect whether a next page exists without a second `COUNT(*)`.
    pub fn fetch_limit(&self) -> i64 {
        self.limit + 1
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub limit: i64,
    pub offset: i64,
    pub next_offset: Option<i64>,
    pub total_estimate: Option<i64>,
}

impl<T> Page<T> {
    /// Build a page from `limit + 1` fetched rows: truncate the extra
    /// row and compute `next_offset` from its presence.
    pub fn from_fetched(mut rows: Vec<T>, pagination: Pagination, total_estimate: Option<i64>) -> Self {
        let has_more = rows.len() as i64 > pagination.limit;
        if has_more {
            rows.truncate(pagination.limit as usize);
        }
        let next_offset = if has_more {
            Some(pagination.offset + pagination.limit)
        } else {
            None
        };
        Self {
            results: rows,
            limit: pagination.limit,
            offset: pagination.offset,
            next_offset,
            total_estimate,
        }
    }
}

/// `total_estimate`: `None` ("many") once the guarded count exceeds
/// [`COUNT_GUARD`].
pub fn guarded_total(count: i64) -> Option<i64> {
    if count > COUNT_GUARD {
        None
    } else {
        Some(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_zero_clamps_to_one() {
        let p = Pagination::resolve(Some(0), None, 100, 500);
        assert_eq!(p.limit, 1);
    }

    #[test]
    fn limit_above_max_clamps_down() {
        let p = Pagination::resolve(Some(10_000), None, 100, 500);
        assert_eq!(p.limit, 500);
    }

    #[test]
    fn negative_offset_clamps_to_zero() {
        let p = Pagination::resolve(None, Some(-5), 100, 500);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn exact_page_boundary_yields_null_next_offset() {
        let pagination = Pagination::resolve(Some(100), Some(200), 100, 500);
        let rows: Vec<i32> = (0..1).collect(); // 1 row remains, no extra
        let page = Page::from_fetched(rows, pagination, Some(201));
        assert_eq!(page.next_offset, None);
    }

    #[test]
    fn extra_row_produces_next_offset() {
        let pagination = Pagination::resolve(Some(100), Some(0), 100, 500);
        let rows: Vec<i32> = (0..101).collect(); // limit+1 fetched
        let page = Page::from_fetched(rows, pagination, Some(500));
        assert_eq!(page.results.len(), 100);
        assert_eq!(page.next_offset, Some(100));
    }

    #[test]
    fn guard_returns_none_past_threshold() {
        assert_eq!(guarded_total(10_001), None);
        assert_eq!(guarded_total(10_000), Some(10_000));
    }
}
