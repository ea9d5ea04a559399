use serde::Serialize;

pub(crate) const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Serialize)]
pub(crate) struct PaginatedResponse<T> {
    pub(crate) items: Vec<T>,
    pub(crate) total_count: i64,
    pub(crate) skip: i64,
    pub(crate) limit: i64,
}

/// Clamps client paging input; a missing limit falls back to `default_limit`.
pub(crate) fn page_bounds(skip: Option<i64>, limit: Option<i64>, default_limit: i64) -> (i64, i64) {
    let skip = skip.unwrap_or(0).max(0);
    let limit = limit.unwrap_or(default_limit).clamp(1, MAX_LIMIT);
    (skip, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_clamped() {
        assert_eq!(page_bounds(None, None, 100), (0, 100));
        assert_eq!(page_bounds(Some(-5), Some(0), 100), (0, 1));
        assert_eq!(page_bounds(Some(20), Some(50_000), 100), (20, MAX_LIMIT));
    }
}
