use serde::{Deserialize, Serialize};

/// Paged envelope returned by search and by paginated proxy calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

/// `pageNum` / `pageSize` query parameters as they arrive on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default, rename = "pageNum")]
    pub page_num: Option<usize>,
    #[serde(default, rename = "pageSize")]
    pub page_size: Option<usize>,
}

impl PageQuery {
    /// The requested window, if both parameters are present.
    ///
    /// A window is only produced for `pageNum >= 1` and `pageSize >= 1`;
    /// supplying just one of the two, or a zero, is an error.
    pub fn window(&self) -> anyhow::Result<Option<PageWindow>> {
        match (self.page_num, self.page_size) {
            (None, None) => Ok(None),
            (Some(num), Some(size)) => PageWindow::new(num, size).map(Some),
            _ => anyhow::bail!("pageNum and pageSize must be given together"),
        }
    }
}

/// A validated 1-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    num: usize,
    size: usize,
}

impl PageWindow {
    pub fn new(num: usize, size: usize) -> anyhow::Result<Self> {
        if num == 0 || size == 0 {
            anyhow::bail!("pageNum and pageSize must be at least 1");
        }
        Ok(Self { num, size })
    }

    pub fn num(&self) -> usize {
        self.num
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slice `items` to this window. Out-of-range pages yield no items;
    /// `total` is always the full length.
    pub fn apply<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len();
        let start = (self.num - 1).saturating_mul(self.size);
        let items = if start >= total {
            Vec::new()
        } else {
            let end = start.saturating_add(self.size).min(total);
            items.into_iter().skip(start).take(end - start).collect()
        };
        Page { items, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<u32> {
        (0..10).collect()
    }

    #[test]
    fn middle_page() {
        let page = PageWindow::new(2, 4).unwrap().apply(records());
        assert_eq!(page.items, vec![4, 5, 6, 7]);
        assert_eq!(page.total, 10);
    }

    #[test]
    fn last_partial_page() {
        let page = PageWindow::new(3, 4).unwrap().apply(records());
        assert_eq!(page.items, vec![8, 9]);
        assert_eq!(page.total, 10);
    }

    #[test]
    fn out_of_range_page_is_empty() {
        let page = PageWindow::new(5, 4).unwrap().apply(records());
        assert!(page.items.is_empty());
        assert_eq!(page.total, 10);

        let page = PageWindow::new(usize::MAX, usize::MAX).unwrap().apply(records());
        assert!(page.items.is_empty());
    }

    #[test]
    fn query_window() {
        let q = PageQuery::default();
        assert_eq!(q.window().unwrap(), None);

        let q = PageQuery {
            page_num: Some(1),
            page_size: Some(20),
        };
        assert_eq!(q.window().unwrap(), Some(PageWindow::new(1, 20).unwrap()));

        let q = PageQuery {
            page_num: Some(1),
            page_size: None,
        };
        assert!(q.window().is_err());

        let q = PageQuery {
            page_num: Some(0),
            page_size: Some(5),
        };
        assert!(q.window().is_err());
    }
}
