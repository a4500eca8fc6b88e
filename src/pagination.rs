//! Page-number pagination with clamping: any integer outside `1..=num_pages`
//! yields the last page, anything unparsable yields the first.

use serde::Serialize;

use crate::config::POSTS_PER_PAGE;

/// A single page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    /// Items in this page
    pub object_list: Vec<T>,
    /// Current page number (1-indexed)
    pub number: usize,
    /// Total number of pages, at least 1
    pub num_pages: usize,
    /// Total number of items across all pages
    pub count: usize,
    pub page_size: usize,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_other_pages(&self) -> bool {
        self.has_next() || self.has_previous()
    }

    pub fn next_page_number(&self) -> Option<usize> {
        self.has_next().then(|| self.number + 1)
    }

    pub fn previous_page_number(&self) -> Option<usize> {
        self.has_previous().then(|| self.number - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.object_list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.object_list.len()
    }

    /// Convert the items while keeping the page metadata.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            object_list: self.object_list.into_iter().map(f).collect::<Result<_, _>>()?,
            number: self.number,
            num_pages: self.num_pages,
            count: self.count,
            page_size: self.page_size,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    page_size: usize,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(POSTS_PER_PAGE)
    }
}

impl Paginator {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    pub fn num_pages(&self, count: usize) -> usize {
        count.div_ceil(self.page_size).max(1)
    }

    /// Never fails: bad input picks page 1, out-of-range input the last page.
    pub fn get_page<T>(&self, items: Vec<T>, page_param: Option<&str>) -> Page<T> {
        let count = items.len();
        let num_pages = self.num_pages(count);
        let number = match page_param.and_then(|p| p.trim().parse::<i64>().ok()) {
            None => 1,
            Some(n) if n < 1 => num_pages,
            Some(n) => usize::try_from(n).map_or(num_pages, |n| n.min(num_pages)),
        };

        let start = (number - 1) * self.page_size;
        let object_list = items
            .into_iter()
            .skip(start)
            .take(self.page_size)
            .collect();

        Page {
            object_list,
            number,
            num_pages,
            count,
            page_size: self.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<usize> {
        (1..=n).collect()
    }

    #[test]
    fn second_page_holds_the_next_slice() {
        let page = Paginator::new(10).get_page(items(25), Some("2"));
        assert_eq!(page.object_list, (11..=20).collect::<Vec<_>>());
        assert_eq!(page.num_pages, 3);
        assert_eq!(page.count, 25);
        assert_eq!(page.previous_page_number(), Some(1));
        assert_eq!(page.next_page_number(), Some(3));
    }

    #[test]
    fn page_past_the_end_is_clamped_to_last() {
        let page = Paginator::new(10).get_page(items(25), Some("100"));
        assert_eq!(page.number, 3);
        assert_eq!(page.object_list, vec![21, 22, 23, 24, 25]);
        assert!(!page.has_next());
    }

    #[test]
    fn garbage_picks_first_page() {
        let paginator = Paginator::new(10);
        assert_eq!(paginator.get_page(items(25), Some("abc")).number, 1);
        assert_eq!(paginator.get_page(items(25), Some("1.5")).number, 1);
        assert_eq!(paginator.get_page(items(25), None).number, 1);
    }

    #[test]
    fn zero_and_negative_pages_are_clamped_to_last() {
        let paginator = Paginator::new(10);
        for param in ["0", "-2", "-99999999999"] {
            let page = paginator.get_page(items(25), Some(param));
            assert_eq!(page.number, 3, "{}", param);
            assert_eq!(page.object_list, vec![21, 22, 23, 24, 25]);
        }
        assert_eq!(paginator.get_page(Vec::<usize>::new(), Some("0")).number, 1);
    }

    #[test]
    fn empty_set_is_an_empty_first_page() {
        let page = Paginator::default().get_page(Vec::<u8>::new(), Some("4"));
        assert_eq!(page.number, 1);
        assert_eq!(page.num_pages, 1);
        assert!(page.is_empty());
        assert!(!page.has_other_pages());
    }
}
