use std::collections::HashSet;

use serde::Serialize;

use super::participant::Participant;

/// Cards per printed sheet, a 2×2 grid
pub const PRINT_COLUMNS: usize = 2;
pub const PRINT_ROWS: usize = 2;

/// Search text and facet selection. `None` facets mean "All".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GalleryFilters {
    pub search: String,
    pub division: Option<String>,
    pub district: Option<String>,
    pub school: Option<String>,
}

impl GalleryFilters {
    pub fn matches(&self, p: &Participant) -> bool {
        let search = self.search.trim().to_lowercase();
        let name_matches = search.is_empty()
            || p.display_name()
                .is_some_and(|n| n.to_lowercase().contains(&search));

        name_matches
            && facet_matches(&self.division, &p.division)
            && facet_matches(&self.district, &p.district)
            && facet_matches(&self.school, &p.school)
    }
}

fn facet_matches(selected: &Option<String>, value: &Option<String>) -> bool {
    match selected {
        None => true,
        Some(selected) => value.as_deref() == Some(selected.as_str()),
    }
}

/// Distinct non-empty values in first-seen order
fn distinct<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .flatten()
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(*v))
        .map(str::to_owned)
        .collect()
}

/// Browses a filtered participant list one card at a time.
///
/// `next`/`prev` stop at the ends. Any change to the search text, the facets
/// or the underlying list puts the cursor back on the first card.
#[derive(Debug, Default)]
pub struct GalleryNavigator {
    participants: Vec<Participant>,
    filters: GalleryFilters,
    filtered: Vec<usize>,
    index: usize,
    pager: PrintPager,
}

impl GalleryNavigator {
    pub fn new(participants: Vec<Participant>) -> Self {
        let mut nav = Self {
            participants,
            ..Default::default()
        };
        nav.refilter();
        nav
    }

    pub fn set_participants(&mut self, participants: Vec<Participant>) {
        self.participants = participants;
        self.refilter();
    }

    pub fn set_search(&mut self, search: &str) {
        self.filters.search = search.to_owned();
        self.refilter();
    }

    /// Selecting a division clears the district and school selection.
    pub fn set_division(&mut self, division: Option<String>) {
        self.filters.division = division;
        self.filters.district = None;
        self.filters.school = None;
        self.refilter();
    }

    /// Selecting a district clears the school selection.
    pub fn set_district(&mut self, district: Option<String>) {
        self.filters.district = district;
        self.filters.school = None;
        self.refilter();
    }

    pub fn set_school(&mut self, school: Option<String>) {
        self.filters.school = school;
        self.refilter();
    }

    fn refilter(&mut self) {
        self.filtered = self
            .participants
            .iter()
            .enumerate()
            .filter(|(_, p)| self.filters.matches(p))
            .map(|(i, _)| i)
            .collect();
        self.index = 0;
        self.pager.reset();
    }

    pub fn filters(&self) -> &GalleryFilters {
        &self.filters
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.filtered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filtered.is_empty()
    }

    pub fn current(&self) -> Option<&Participant> {
        self.filtered
            .get(self.index)
            .map(|&i| &self.participants[i])
    }

    pub fn next(&mut self) {
        if self.index + 1 < self.filtered.len() {
            self.index += 1;
        }
    }

    pub fn prev(&mut self) {
        self.index = self.index.saturating_sub(1);
    }

    pub fn filtered(&self) -> impl Iterator<Item = &Participant> {
        self.filtered.iter().map(|&i| &self.participants[i])
    }

    pub fn division_options(&self) -> Vec<String> {
        distinct(self.participants.iter().map(|p| p.division.as_deref()))
    }

    /// Districts within the selected division
    pub fn district_options(&self) -> Vec<String> {
        distinct(
            self.participants
                .iter()
                .filter(|p| facet_matches(&self.filters.division, &p.division))
                .map(|p| p.district.as_deref()),
        )
    }

    /// Schools within the selected division and district
    pub fn school_options(&self) -> Vec<String> {
        distinct(
            self.participants
                .iter()
                .filter(|p| {
                    facet_matches(&self.filters.division, &p.division)
                        && facet_matches(&self.filters.district, &p.district)
                })
                .map(|p| p.school.as_deref()),
        )
    }

    pub fn pager(&self) -> &PrintPager {
        &self.pager
    }

    pub fn next_page(&mut self) {
        self.pager.next(self.filtered.len());
    }

    pub fn prev_page(&mut self) {
        self.pager.prev();
    }

    /// Cards on the current print sheet
    pub fn print_page(&self) -> Vec<&Participant> {
        self.pager
            .range(self.filtered.len())
            .map(|i| &self.participants[self.filtered[i]])
            .collect()
    }
}

/// Splits a card list into fixed-size print sheets.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintPager {
    per_page: usize,
    page: usize,
}

impl Default for PrintPager {
    fn default() -> Self {
        Self::new(PRINT_COLUMNS * PRINT_ROWS)
    }
}

impl PrintPager {
    pub fn new(per_page: usize) -> Self {
        Self {
            per_page: per_page.max(1),
            page: 0,
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    pub fn total_pages(&self, total: usize) -> usize {
        total.div_ceil(self.per_page)
    }

    pub fn next(&mut self, total: usize) {
        if self.page + 1 < self.total_pages(total) {
            self.page += 1;
        }
    }

    pub fn prev(&mut self) {
        self.page = self.page.saturating_sub(1);
    }

    pub fn reset(&mut self) {
        self.page = 0;
    }

    /// Item positions on the current page
    pub fn range(&self, total: usize) -> std::ops::Range<usize> {
        let start = (self.page * self.per_page).min(total);
        let end = (start + self.per_page).min(total);
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(name: &str, division: &str, district: &str, school: &str) -> Participant {
        Participant {
            name: Some(name.to_owned()),
            division: Some(division.to_owned()),
            district: Some(district.to_owned()),
            school: Some(school.to_owned()),
            ..Default::default()
        }
    }

    fn roster() -> Vec<Participant> {
        vec![
            participant("Ana Reyes", "Camarines Norte", "Daet North", "Daet ES"),
            participant("Ben Cruz", "Camarines Norte", "Daet South", "Bagasbas ES"),
            participant("Carla Lim", "Naga City", "Naga Central", "Naga CES"),
            participant("Dan Ocampo", "Camarines Norte", "Daet North", "Gahonon ES"),
            participant("Ella Ramos", "Naga City", "Naga East", "Naga EES"),
        ]
    }

    #[test]
    fn test_navigator_clamps() {
        let mut nav = GalleryNavigator::new(roster());
        assert_eq!(nav.index(), 0);

        nav.prev();
        assert_eq!(nav.index(), 0);

        for _ in 0..10 {
            nav.next();
        }
        assert_eq!(nav.index(), 4);
        assert_eq!(nav.current().unwrap().display_name(), Some("Ella Ramos"));

        nav.next();
        assert_eq!(nav.index(), 4);
    }

    #[test]
    fn test_filter_change_resets_index() {
        let mut nav = GalleryNavigator::new(roster());
        nav.next();
        nav.next();

        nav.set_search("  LA ");
        assert_eq!(nav.index(), 0);
        let names: Vec<_> = nav.filtered().filter_map(|p| p.display_name()).collect();
        assert_eq!(names, vec!["Carla Lim", "Ella Ramos"]);

        nav.next();
        nav.set_school(None);
        assert_eq!(nav.index(), 0);
    }

    #[test]
    fn test_hierarchical_facets() {
        let mut nav = GalleryNavigator::new(roster());
        nav.set_division(Some("Camarines Norte".to_owned()));
        nav.set_district(Some("Daet North".to_owned()));
        nav.set_school(Some("Daet ES".to_owned()));
        assert_eq!(nav.len(), 1);

        nav.set_district(Some("Daet South".to_owned()));
        assert_eq!(nav.filters().school, None);
        assert_eq!(nav.len(), 1);

        nav.set_division(Some("Naga City".to_owned()));
        assert_eq!(nav.filters().district, None);
        assert_eq!(nav.filters().school, None);
        assert_eq!(nav.len(), 2);
    }

    #[test]
    fn test_facet_options() {
        let mut nav = GalleryNavigator::new(roster());
        assert_eq!(nav.division_options(), vec!["Camarines Norte", "Naga City"]);
        assert_eq!(nav.district_options().len(), 4);

        nav.set_division(Some("Camarines Norte".to_owned()));
        assert_eq!(nav.district_options(), vec!["Daet North", "Daet South"]);

        nav.set_district(Some("Daet North".to_owned()));
        assert_eq!(nav.school_options(), vec!["Daet ES", "Gahonon ES"]);
    }

    #[test]
    fn test_empty_gallery() {
        let mut nav = GalleryNavigator::new(vec![]);
        nav.next();
        nav.prev();
        assert!(nav.current().is_none());
        assert!(nav.print_page().is_empty());
    }

    #[test]
    fn test_print_pages() {
        let mut nav = GalleryNavigator::new(roster());
        assert_eq!(nav.pager().total_pages(nav.len()), 2);
        assert_eq!(nav.print_page().len(), 4);

        nav.next_page();
        assert_eq!(nav.print_page().len(), 1);
        nav.next_page();
        assert_eq!(nav.pager().page(), 1);

        nav.set_search("a");
        assert_eq!(nav.pager().page(), 0);
        nav.prev_page();
        assert_eq!(nav.pager().page(), 0);
    }
}
