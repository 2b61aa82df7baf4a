use crate::cache::SnapshotCache;
use crate::error::EngineError;
use analytics::{AnalyticsSnapshot, IndexMetrics};
use configuration::QuerySettings;
use core_types::{
    CoreError, Distribution, Heatmap, Index, IndexDetail, IndexPage, IndexSummary,
    ListIndicesParams, SortField, SortOrder,
};
use database::DbRepository;
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// Read side of the service. Every call answers from a single snapshot, so one
/// response never mixes values from two refreshes.
#[derive(Debug, Clone)]
pub struct QueryService {
    repo: DbRepository,
    cache: SnapshotCache,
    settings: QuerySettings,
}

/// Validated listing parameters.
#[derive(Debug, Clone, PartialEq)]
struct ListQuery {
    q: Option<String>,
    page: i64,
    page_size: i64,
    sort_by: SortField,
    order: SortOrder,
}

impl QueryService {
    pub fn new(repo: DbRepository, cache: SnapshotCache, settings: QuerySettings) -> Self {
        Self { repo, cache, settings }
    }

    /// Filters, sorts and paginates the index list.
    ///
    /// Null sort keys go last in both directions and equal keys fall back to
    /// the code, so consecutive pages never overlap.
    pub async fn list_indices(&self, params: &ListIndicesParams) -> Result<IndexPage, EngineError> {
        let query = self.validate(params)?;
        let indices = self.repo.list_indices(query.q.as_deref()).await?;
        let snapshot = self.cache.load();

        let mut items: Vec<IndexSummary> =
            indices.iter().map(|index| self.summarize(index, &snapshot)).collect();
        items.sort_by(|a, b| compare(a, b, query.sort_by, query.order));

        let total = items.len();
        let offset = usize::try_from((query.page - 1).saturating_mul(query.page_size)).unwrap_or(usize::MAX);
        let items = items.into_iter().skip(offset).take(query.page_size as usize).collect();

        Ok(IndexPage { items, total, page: query.page, page_size: query.page_size })
    }

    pub async fn get_index(&self, code: &str) -> Result<IndexDetail, EngineError> {
        let index = self.repo.get_index(code).await?;
        let snapshot = self.cache.load();
        let stats = snapshot.metrics_for(code).and_then(|m| m.stats_3y);

        Ok(IndexDetail {
            summary: self.summarize(&index, &snapshot),
            high_3y: stats.map(|s| s.high),
            low_3y: stats.map(|s| s.low),
            avg_3y: stats.map(|s| s.avg),
        })
    }

    /// The refresh task behind the served snapshot, `None` before any refresh.
    pub fn snapshot_task_id(&self) -> Option<String> {
        self.cache.load().task_id.clone()
    }

    pub fn heatmap(&self) -> Heatmap {
        self.cache.load().heatmap.clone()
    }

    pub fn distribution(&self) -> Distribution {
        self.cache.load().distribution.clone()
    }

    fn validate(&self, params: &ListIndicesParams) -> Result<ListQuery, CoreError> {
        let page = params.page.unwrap_or(1);
        if page < 1 {
            return Err(CoreError::invalid("page", format!("must be at least 1, got {page}")));
        }
        let page_size = params.page_size.unwrap_or(self.settings.default_page_size);
        if page_size < 1 || page_size > self.settings.max_page_size {
            return Err(CoreError::invalid(
                "page_size",
                format!("must be between 1 and {}, got {page_size}", self.settings.max_page_size),
            ));
        }
        let sort_by = match params.sort_by.as_deref() {
            Some(raw) => raw.parse()?,
            None => SortField::Code,
        };
        let order = match params.sort_order.as_deref() {
            Some(raw) => raw.parse()?,
            None => SortOrder::Asc,
        };
        let q = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()).map(str::to_string);

        Ok(ListQuery { q, page, page_size, sort_by, order })
    }

    fn summarize(&self, index: &Index, snapshot: &AnalyticsSnapshot) -> IndexSummary {
        let metrics = snapshot.metrics_for(&index.code);
        let percentile = |pick: fn(&IndexMetrics) -> Option<Decimal>| metrics.and_then(pick);

        IndexSummary {
            code: index.code.clone(),
            name: index.name.clone(),
            full_name: index.full_name.clone(),
            csindex_url: self.settings.csindex_url(&index.code),
            current_price: index.current_price,
            percentile_1m: percentile(|m| m.percentile_1m),
            percentile_3y: percentile(|m| m.percentile_3y),
            percentile_since_inception: percentile(|m| m.percentile_since_inception),
            updated_at: index.updated_at,
        }
    }
}

fn compare(a: &IndexSummary, b: &IndexSummary, field: SortField, order: SortOrder) -> Ordering {
    let primary = match field {
        SortField::Code => directed(a.code.cmp(&b.code), order),
        SortField::Name => directed(a.name.cmp(&b.name), order),
        SortField::UpdatedAt => directed(a.updated_at.cmp(&b.updated_at), order),
        SortField::CurrentPrice => nulls_last(a.current_price, b.current_price, order),
        SortField::Percentile(window) => nulls_last(a.percentile(window), b.percentile(window), order),
    };
    primary.then_with(|| a.code.cmp(&b.code))
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn nulls_last(a: Option<Decimal>, b: Option<Decimal>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => directed(a.cmp(&b), order),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
