//! Page slicing for listing results

use serde::Serialize;

/// One page of a larger result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo<T> {
    /// Size of the full result set
    pub total: usize,
    /// 1-based page number
    pub page_no: usize,
    pub page_size: usize,
    pub total_list: Vec<T>,
}

impl<T> PageInfo<T> {
    /// Cut page `page_no` (1-based, 0 treated as 1) out of `items`
    pub fn slice(items: Vec<T>, page_no: usize, page_size: usize) -> Self {
        let page_no = page_no.max(1);
        let total = items.len();
        let start = (page_no - 1).saturating_mul(page_size).min(total);
        let total_list = items.into_iter().skip(start).take(page_size).collect();
        Self {
            total,
            page_no,
            page_size,
            total_list,
        }
    }

    pub fn total_pages(&self) -> usize {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size)
    }
}
