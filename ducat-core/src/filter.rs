//! Query parsing and the filter/pagination pipeline.
//!
//! Every read endpoint flows through [`evaluate`]: filter by `added_after`,
//! then `match[id]`, then `match[type]`, then resolve `match[version]`,
//! stable-sort by `date_added`, and slice one page. The function is pure, so
//! identical inputs always produce identical pages; backends that translate
//! these filters into a native query language are held to the same result.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Result, TaxiiError};
use crate::timestamp::Timestamp;

/// View the engine needs of any candidate record.
pub trait FilterRecord {
    fn id(&self) -> &str;
    fn object_type(&self) -> &str;
    fn version(&self) -> Timestamp;
    fn date_added(&self) -> Timestamp;
}

/// Parsed `match[version]` selector. The sentinels and explicit timestamps
/// are additive: `first,last` keeps both the earliest and latest revision
/// of each id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSelect {
    pub first: bool,
    pub last: bool,
    pub all: bool,
    pub explicit: BTreeSet<Timestamp>,
}

impl VersionSelect {
    /// The selector used when the request names none: latest per id.
    pub fn latest() -> Self {
        VersionSelect {
            first: false,
            last: true,
            all: false,
            explicit: BTreeSet::new(),
        }
    }

    /// Keep every revision. The version-listing endpoint defaults to this.
    pub fn all_versions() -> Self {
        VersionSelect {
            first: false,
            last: false,
            all: true,
            explicit: BTreeSet::new(),
        }
    }

    fn none() -> Self {
        VersionSelect {
            first: false,
            last: false,
            all: false,
            explicit: BTreeSet::new(),
        }
    }

    /// Apply the selector to the full sorted-irrelevant list of versions of
    /// one object. Used where whole-object operations (deletes, version
    /// listings) need the matching subset rather than record filtering.
    pub fn pick(&self, versions: &[Timestamp]) -> Vec<Timestamp> {
        if self.all {
            return versions.to_vec();
        }
        let earliest = versions.iter().copied().min();
        let latest = versions.iter().copied().max();
        versions
            .iter()
            .copied()
            .filter(|v| {
                (self.last && Some(*v) == latest)
                    || (self.first && Some(*v) == earliest)
                    || self.explicit.contains(v)
            })
            .collect()
    }

    fn parse_into(&mut self, value: &str) -> Result<()> {
        let mut saw_token = false;
        for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            saw_token = true;
            match token {
                "first" => self.first = true,
                "last" => self.last = true,
                "all" => self.all = true,
                other => {
                    let ts = Timestamp::parse(other).map_err(|_| {
                        TaxiiError::InvalidFilter(format!(
                            "invalid match[version] value: {other}"
                        ))
                    })?;
                    self.explicit.insert(ts);
                }
            }
        }
        if !saw_token {
            return Err(TaxiiError::InvalidFilter(
                "empty match[version] filter".into(),
            ));
        }
        Ok(())
    }
}

impl Default for VersionSelect {
    fn default() -> Self {
        Self::latest()
    }
}

/// The recognized filter parameters of one request.
///
/// `version: None` means the request named no selector; each endpoint
/// supplies its own default (latest for object reads, everything for
/// version listings).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    /// Exclusive lower bound on `date_added`.
    pub added_after: Option<Timestamp>,
    pub ids: Option<BTreeSet<String>>,
    pub types: Option<BTreeSet<String>>,
    pub version: Option<VersionSelect>,
}

/// Pagination request: client limit (pre-clamp) and cursor offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Page-size policy supplied by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePolicy {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for PagePolicy {
    fn default() -> Self {
        PagePolicy {
            default_limit: 100,
            max_limit: 100,
        }
    }
}

impl PagePolicy {
    /// Clamp a client-requested limit. Zero or absent means the server
    /// default.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(limit) if limit > 0 => limit.min(self.max_limit),
            _ => self.default_limit.min(self.max_limit),
        }
    }
}

/// Canonical, validated form of a request's query string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: FilterSet,
    pub page: PageRequest,
}

impl Query {
    /// Parse raw query parameters, TAXII style: comma-separated value lists,
    /// repeatable keys unioned. Unrecognized `match[...]` fields and
    /// unparseable values are rejected rather than silently dropped.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut query = Query::default();
        for (key, value) in pairs {
            match key {
                "added_after" => {
                    let ts = Timestamp::parse(value).map_err(|_| {
                        TaxiiError::InvalidFilter(format!("invalid added_after value: {value}"))
                    })?;
                    query.filters.added_after = Some(ts);
                }
                "limit" => {
                    let limit: usize = value.parse().map_err(|_| {
                        TaxiiError::InvalidFilter(format!("invalid limit value: {value}"))
                    })?;
                    query.page.limit = (limit > 0).then_some(limit);
                }
                "next" => {
                    query.page.offset = value.parse().map_err(|_| {
                        TaxiiError::InvalidFilter(format!("invalid next token: {value}"))
                    })?;
                }
                "match[id]" => {
                    merge_set(query.filters.ids.get_or_insert_with(BTreeSet::new), key, value)?;
                }
                "match[type]" => {
                    merge_set(query.filters.types.get_or_insert_with(BTreeSet::new), key, value)?;
                }
                "match[version]" => {
                    query
                        .filters
                        .version
                        .get_or_insert_with(VersionSelect::none)
                        .parse_into(value)?;
                }
                other if other.starts_with("match[") => {
                    return Err(TaxiiError::InvalidFilter(format!(
                        "unsupported match field: {other}"
                    )));
                }
                _ => {}
            }
        }
        Ok(query)
    }

    /// Restrict the query to one object id, as the single-object endpoints
    /// require.
    pub fn scoped_to_object(mut self, object_id: &str) -> Self {
        self.filters.ids = Some(BTreeSet::from([object_id.to_owned()]));
        self
    }
}

fn merge_set(set: &mut BTreeSet<String>, key: &str, value: &str) -> Result<()> {
    let before = set.len();
    set.extend(
        value
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from),
    );
    if set.len() == before && value.split(',').all(|t| t.trim().is_empty()) {
        return Err(TaxiiError::InvalidFilter(format!("empty {key} filter")));
    }
    Ok(())
}

/// One page of filtered results plus the bookkeeping the response needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Size of the filtered candidate set before paging.
    pub total: usize,
    pub more: bool,
    pub next: Option<String>,
    pub first_added: Option<Timestamp>,
    pub last_added: Option<Timestamp>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Page {
            items: Vec::new(),
            total: 0,
            more: false,
            next: None,
            first_added: None,
            last_added: None,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            more: self.more,
            next: self.next,
            first_added: self.first_added,
            last_added: self.last_added,
        }
    }
}

/// Run the filter pipeline over a candidate set and slice one page.
pub fn evaluate<T: FilterRecord>(candidates: Vec<T>, query: &Query, policy: PagePolicy) -> Page<T> {
    let filters = &query.filters;
    let mut matched: Vec<T> = candidates
        .into_iter()
        .filter(|r| filters.added_after.is_none_or(|t| r.date_added() > t))
        .filter(|r| filters.ids.as_ref().is_none_or(|ids| ids.contains(r.id())))
        .filter(|r| {
            filters
                .types
                .as_ref()
                .is_none_or(|types| types.contains(r.object_type()))
        })
        .collect();

    let sel = filters.version.clone().unwrap_or_default();
    if !sel.all {
        let mut bounds: HashMap<String, (Timestamp, Timestamp)> = HashMap::new();
        if sel.first || sel.last {
            for record in &matched {
                let v = record.version();
                bounds
                    .entry(record.id().to_owned())
                    .and_modify(|(earliest, latest)| {
                        *earliest = v.min(*earliest);
                        *latest = v.max(*latest);
                    })
                    .or_insert((v, v));
            }
        }
        matched.retain(|record| {
            let v = record.version();
            let by_bound = bounds.get(record.id()).is_some_and(|&(earliest, latest)| {
                (sel.last && v == latest) || (sel.first && v == earliest)
            });
            by_bound || sel.explicit.contains(&v)
        });
    }

    matched.sort_by_key(|record| record.date_added());

    let total = matched.len();
    let limit = policy.effective_limit(query.page.limit);
    let offset = query.page.offset;
    let items: Vec<T> = matched.into_iter().skip(offset).take(limit).collect();
    let more = offset.saturating_add(limit) < total;
    let next = more.then(|| offset.saturating_add(limit).to_string());

    Page {
        first_added: items.first().map(FilterRecord::date_added),
        last_added: items.last().map(FilterRecord::date_added),
        items,
        total,
        more,
        next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Rec {
        id: String,
        object_type: String,
        version: Timestamp,
        date_added: Timestamp,
    }

    impl FilterRecord for Rec {
        fn id(&self) -> &str {
            &self.id
        }

        fn object_type(&self) -> &str {
            &self.object_type
        }

        fn version(&self) -> Timestamp {
            self.version
        }

        fn date_added(&self) -> Timestamp {
            self.date_added
        }
    }

    fn rec(id: &str, version: &str, added: &str) -> Rec {
        Rec {
            id: id.into(),
            object_type: id.split("--").next().unwrap().into(),
            version: Timestamp::parse(version).unwrap(),
            date_added: Timestamp::parse(added).unwrap(),
        }
    }

    const A: &str = "indicator--9ad1a07c-5936-4cd6-9492-225b751b9bd4";
    const B: &str = "malware--0d9d6c17-8368-4b5b-903c-fc2ca4105b31";
    const C: &str = "relationship--2f9a9aa9-108a-4333-83e2-4fb25add676b";

    fn query(pairs: &[(&str, &str)]) -> Query {
        Query::from_pairs(pairs.iter().copied()).unwrap()
    }

    fn sample() -> Vec<Rec> {
        vec![
            rec(A, "2020-01-01T00:00:00.000Z", "2020-02-01T00:00:00.000Z"),
            rec(A, "2020-01-05T00:00:00.000Z", "2020-02-02T00:00:00.000Z"),
            rec(B, "2020-01-03T00:00:00.000Z", "2020-02-03T00:00:00.000Z"),
        ]
    }

    #[test]
    fn default_version_keeps_latest_per_id() {
        let page = evaluate(sample(), &Query::default(), PagePolicy::default());
        let versions: Vec<_> = page.items.iter().map(|r| r.version.to_rfc3339()).collect();
        assert_eq!(
            versions,
            ["2020-01-05T00:00:00.000Z", "2020-01-03T00:00:00.000Z"]
        );
        assert_eq!(page.total, 2);
        assert!(!page.more);
    }

    #[test]
    fn version_first_keeps_earliest_per_id() {
        let page = evaluate(
            sample(),
            &query(&[("match[version]", "first")]),
            PagePolicy::default(),
        );
        let versions: Vec<_> = page.items.iter().map(|r| r.version.to_rfc3339()).collect();
        assert_eq!(
            versions,
            ["2020-01-01T00:00:00.000Z", "2020-01-03T00:00:00.000Z"]
        );
    }

    #[test]
    fn version_first_and_last_keep_both_bounds() {
        let mut candidates = sample();
        candidates.push(rec(A, "2020-01-03T12:00:00.000Z", "2020-02-04T00:00:00.000Z"));
        let page = evaluate(
            candidates,
            &query(&[("match[version]", "first,last")]),
            PagePolicy::default(),
        );
        let a_versions: Vec<_> = page
            .items
            .iter()
            .filter(|r| r.id == A)
            .map(|r| r.version.to_rfc3339())
            .collect();
        assert_eq!(
            a_versions,
            ["2020-01-01T00:00:00.000Z", "2020-01-05T00:00:00.000Z"]
        );
    }

    #[test]
    fn version_all_keeps_every_revision() {
        let page = evaluate(
            sample(),
            &query(&[("match[version]", "all")]),
            PagePolicy::default(),
        );
        assert_eq!(page.total, 3);
    }

    #[test]
    fn version_explicit_keeps_exact_matches_only() {
        let page = evaluate(
            sample(),
            &query(&[("match[version]", "2020-01-01T00:00:00.000Z")]),
            PagePolicy::default(),
        );
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, A);
    }

    #[test]
    fn added_after_is_an_exclusive_bound() {
        let page = evaluate(
            sample(),
            &query(&[
                ("added_after", "2020-02-02T00:00:00.000Z"),
                ("match[version]", "all"),
            ]),
            PagePolicy::default(),
        );
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, B);
    }

    #[test]
    fn match_id_and_type_narrow_candidates() {
        let by_id = evaluate(
            sample(),
            &query(&[("match[id]", B), ("match[version]", "all")]),
            PagePolicy::default(),
        );
        assert!(by_id.items.iter().all(|r| r.id == B));

        let by_type = evaluate(
            sample(),
            &query(&[("match[type]", "indicator,malware"), ("match[version]", "all")]),
            PagePolicy::default(),
        );
        assert_eq!(by_type.total, 3);

        let none = evaluate(
            sample(),
            &query(&[("match[type]", "campaign")]),
            PagePolicy::default(),
        );
        assert_eq!(none.total, 0);
        assert!(!none.more);
    }

    #[test]
    fn results_sort_by_date_added_keeping_insertion_order_on_ties() {
        let tied = vec![
            rec(B, "2020-01-01T00:00:00.000Z", "2020-02-01T00:00:00.000Z"),
            rec(A, "2020-01-01T00:00:00.000Z", "2020-02-01T00:00:00.000Z"),
            rec(C, "2020-01-01T00:00:00.000Z", "2020-01-15T00:00:00.000Z"),
        ];
        let page = evaluate(tied, &Query::default(), PagePolicy::default());
        let ids: Vec<_> = page.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, [C, B, A]);
    }

    #[test]
    fn pagination_walks_five_matches_in_pages_of_two() {
        let candidates: Vec<Rec> = (1..=5)
            .map(|i| {
                rec(
                    &format!("indicator--00000000-0000-4000-8000-00000000000{i}"),
                    "2020-01-01T00:00:00.000Z",
                    &format!("2020-03-0{i}T00:00:00.000Z"),
                )
            })
            .collect();

        let first = evaluate(
            candidates.clone(),
            &query(&[("limit", "2")]),
            PagePolicy::default(),
        );
        assert_eq!(first.items.len(), 2);
        assert!(first.more);
        assert_eq!(first.first_added, Some(candidates[0].date_added));
        assert_eq!(first.last_added, Some(candidates[1].date_added));

        let second = evaluate(
            candidates.clone(),
            &query(&[("limit", "2"), ("next", first.next.as_deref().unwrap())]),
            PagePolicy::default(),
        );
        assert_eq!(second.items.len(), 2);
        assert!(second.more);

        let third = evaluate(
            candidates.clone(),
            &query(&[("limit", "2"), ("next", second.next.as_deref().unwrap())]),
            PagePolicy::default(),
        );
        assert_eq!(third.items.len(), 1);
        assert!(!third.more);
        assert_eq!(third.next, None);

        let mut walked: Vec<Rec> = Vec::new();
        walked.extend(first.items);
        walked.extend(second.items);
        walked.extend(third.items);
        assert_eq!(walked, candidates);
    }

    #[test]
    fn cursor_beyond_the_end_yields_an_empty_page() {
        let page = evaluate(sample(), &query(&[("next", "50")]), PagePolicy::default());
        assert!(page.items.is_empty());
        assert!(!page.more);
        assert_eq!(page.first_added, None);
    }

    #[test]
    fn limit_zero_falls_back_to_the_server_default() {
        let q = query(&[("limit", "0"), ("match[version]", "all")]);
        assert_eq!(q.page.limit, None);
        let page = evaluate(sample(), &q, PagePolicy::default());
        assert_eq!(page.items.len(), 3);
    }

    #[test]
    fn limit_is_clamped_to_the_configured_maximum() {
        let policy = PagePolicy {
            default_limit: 10,
            max_limit: 2,
        };
        let page = evaluate(sample(), &query(&[("limit", "500"), ("match[version]", "all")]), policy);
        assert_eq!(page.items.len(), 2);
        assert!(page.more);
    }

    #[test]
    fn evaluate_is_deterministic() {
        let q = query(&[("limit", "2"), ("match[type]", "indicator,malware")]);
        let one = evaluate(sample(), &q, PagePolicy::default());
        let two = evaluate(sample(), &q, PagePolicy::default());
        assert_eq!(one, two);
    }

    #[test]
    fn parse_rejects_malformed_values() {
        for pairs in [
            vec![("added_after", "not-a-time")],
            vec![("match[version]", "latest")],
            vec![("match[version]", "")],
            vec![("limit", "many")],
            vec![("limit", "-3")],
            vec![("next", "page-two")],
            vec![("match[id]", ",")],
            vec![("match[unknown]", "x")],
        ] {
            let err = Query::from_pairs(pairs.iter().copied()).unwrap_err();
            assert!(
                matches!(err, TaxiiError::InvalidFilter(_)),
                "expected InvalidFilter for {pairs:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn parse_unions_repeated_and_comma_separated_values() {
        let q = query(&[("match[type]", "indicator, malware"), ("match[type]", "tool")]);
        let types = q.filters.types.unwrap();
        assert_eq!(types.len(), 3);
        assert!(types.contains("malware"));
        assert!(types.contains("tool"));
    }

    #[test]
    fn parse_ignores_unrelated_parameters() {
        let q = query(&[("pretty", "true"), ("limit", "5")]);
        assert_eq!(q.page.limit, Some(5));
    }

    #[test]
    fn pick_applies_selectors_to_version_lists() {
        let t1 = Timestamp::parse("2020-01-01T00:00:00.000Z").unwrap();
        let t2 = Timestamp::parse("2020-01-02T00:00:00.000Z").unwrap();
        let t3 = Timestamp::parse("2020-01-03T00:00:00.000Z").unwrap();
        let versions = [t2, t1, t3];

        assert_eq!(VersionSelect::latest().pick(&versions), vec![t3]);
        let mut first = VersionSelect::none();
        first.parse_into("first").unwrap();
        assert_eq!(first.pick(&versions), vec![t1]);
        let mut all = VersionSelect::none();
        all.parse_into("all").unwrap();
        assert_eq!(all.pick(&versions).len(), 3);
        let mut explicit = VersionSelect::none();
        explicit.parse_into("2020-01-02T00:00:00.000Z").unwrap();
        assert_eq!(explicit.pick(&versions), vec![t2]);
    }
}
