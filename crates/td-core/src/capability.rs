//! # Platform Capability Descriptors
//!
//! Static metadata per upstream platform: which canonical fields it knows,
//! what they are called natively, how they are typed, and which limits the
//! platform imposes on a request.
//!
//! Descriptors are built once at startup (built-in catalog plus configured
//! overrides) and shared read-only behind an [`Arc`] from then on.

use crate::platform::PlatformId;
use crate::value::FieldType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Whether a field may be grouped on, aggregated, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    Dimension,
    Metric,
    Either,
}

impl FieldRole {
    pub fn allows_dimension(self) -> bool {
        matches!(self, Self::Dimension | Self::Either)
    }

    pub fn allows_metric(self) -> bool {
        matches!(self, Self::Metric | Self::Either)
    }
}

/// Value encoding applied to native strings during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Casing {
    #[default]
    Preserve,
    Lower,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub canonical: String,
    pub native: String,
    pub field_type: FieldType,
    pub role: FieldRole,
    pub casing: Casing,
}

impl FieldSpec {
    pub fn dimension(canonical: &str, native: &str, field_type: FieldType) -> Self {
        Self {
            canonical: canonical.to_string(),
            native: native.to_string(),
            field_type,
            role: FieldRole::Dimension,
            casing: Casing::Preserve,
        }
    }

    pub fn metric(canonical: &str, native: &str, field_type: FieldType) -> Self {
        Self {
            canonical: canonical.to_string(),
            native: native.to_string(),
            field_type,
            role: FieldRole::Metric,
            casing: Casing::Preserve,
        }
    }

    pub fn lowercased(mut self) -> Self {
        self.casing = Casing::Lower;
        self
    }
}

/// Filter shapes a platform can express natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSupport {
    pub equality: bool,
    pub in_list: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityDescriptor {
    platform: PlatformId,
    fields: BTreeMap<String, FieldSpec>,
    by_native: HashMap<String, String>,
    native_date_format: String,
    max_lookback_days: u32,
    max_page_size: u32,
    filters: FilterSupport,
    native_ordering: bool,
}

impl CapabilityDescriptor {
    /// An empty descriptor with conservative limits.
    pub fn new(platform: PlatformId) -> Self {
        Self {
            platform,
            fields: BTreeMap::new(),
            by_native: HashMap::new(),
            native_date_format: "%Y-%m-%d".into(),
            max_lookback_days: 365,
            max_page_size: 1000,
            filters: FilterSupport {
                equality: true,
                in_list: false,
            },
            native_ordering: false,
        }
    }

    /// Add a field. When several canonical names share a native field the
    /// first one registered keeps the inverse mapping.
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.by_native
            .entry(spec.native.clone())
            .or_insert_with(|| spec.canonical.clone());
        self.fields.insert(spec.canonical.clone(), spec);
        self
    }

    pub fn with_native_date_format(mut self, format: &str) -> Self {
        self.native_date_format = format.to_string();
        self
    }

    pub fn with_max_lookback_days(mut self, days: u32) -> Self {
        self.max_lookback_days = days;
        self
    }

    pub fn with_max_page_size(mut self, rows: u32) -> Self {
        self.max_page_size = rows.max(1);
        self
    }

    pub fn with_filter_support(mut self, filters: FilterSupport) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_native_ordering(mut self, native_ordering: bool) -> Self {
        self.native_ordering = native_ordering;
        self
    }

    /// Built-in GA4 Data API catalog.
    pub fn ga4() -> Self {
        use FieldType::*;
        Self::new(PlatformId::Ga4)
            .with_native_date_format("%Y%m%d")
            .with_max_lookback_days(540)
            .with_max_page_size(10_000)
            .with_filter_support(FilterSupport {
                equality: true,
                in_list: true,
            })
            .with_native_ordering(true)
            .field(FieldSpec::dimension("date", "date", Date))
            .field(FieldSpec::dimension("country", "country", String))
            .field(FieldSpec::dimension("device", "deviceCategory", String).lowercased())
            .field(FieldSpec::dimension("page_path", "pagePath", String))
            .field(FieldSpec::dimension("page_title", "pageTitle", String))
            .field(FieldSpec::dimension("source", "sessionSource", String))
            .field(FieldSpec::dimension("medium", "sessionMedium", String))
            .field(FieldSpec::metric("sessions", "sessions", Integer))
            .field(FieldSpec::metric("users", "totalUsers", Integer))
            .field(FieldSpec::metric("new_users", "newUsers", Integer))
            .field(FieldSpec::metric("page_views", "screenPageViews", Integer))
            .field(FieldSpec::metric("bounce_rate", "bounceRate", Float))
            .field(FieldSpec::metric(
                "avg_session_duration",
                "averageSessionDuration",
                Float,
            ))
            .field(FieldSpec::metric("sessions_per_user", "sessionsPerUser", Float))
    }

    /// Built-in Search Console Search Analytics catalog.
    pub fn gsc() -> Self {
        use FieldType::*;
        Self::new(PlatformId::Gsc)
            .with_native_date_format("%Y-%m-%d")
            // 16 months of retained data.
            .with_max_lookback_days(486)
            .with_max_page_size(25_000)
            .with_filter_support(FilterSupport {
                equality: true,
                in_list: false,
            })
            .with_native_ordering(false)
            .field(FieldSpec::dimension("date", "date", Date))
            .field(FieldSpec::dimension("country", "country", String))
            .field(FieldSpec::dimension("device", "device", String).lowercased())
            .field(FieldSpec::dimension("page", "page", String))
            .field(FieldSpec::dimension("query", "query", String))
            .field(FieldSpec::dimension(
                "search_appearance",
                "searchAppearance",
                String,
            ))
            .field(FieldSpec::metric("clicks", "clicks", Integer))
            .field(FieldSpec::metric("impressions", "impressions", Integer))
            .field(FieldSpec::metric("ctr", "ctr", Float))
            .field(FieldSpec::metric("position", "position", Float))
    }

    pub fn builtin(platform: PlatformId) -> Self {
        match platform {
            PlatformId::Ga4 => Self::ga4(),
            PlatformId::Gsc => Self::gsc(),
        }
    }

    pub fn platform(&self) -> PlatformId {
        self.platform
    }

    pub fn resolve(&self, canonical: &str) -> Option<&FieldSpec> {
        self.fields.get(canonical)
    }

    /// Inverse lookup: native name to canonical name.
    pub fn canonical_for(&self, native: &str) -> Option<&str> {
        self.by_native.get(native).map(String::as_str)
    }

    pub fn supports(&self, canonical: &str) -> bool {
        self.fields.contains_key(canonical)
    }

    pub fn covers<'a, I>(&self, canonical: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        canonical.into_iter().all(|name| self.supports(name))
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }

    pub fn native_date_format(&self) -> &str {
        &self.native_date_format
    }

    pub fn max_lookback_days(&self) -> u32 {
        self.max_lookback_days
    }

    pub fn max_page_size(&self) -> u32 {
        self.max_page_size
    }

    pub fn filter_support(&self) -> FilterSupport {
        self.filters
    }

    pub fn native_ordering(&self) -> bool {
        self.native_ordering
    }

    pub fn summary(&self) -> CapabilitySummary {
        let describe = |spec: &FieldSpec| FieldSummary {
            name: spec.canonical.clone(),
            native: spec.native.clone(),
            field_type: spec.field_type,
        };
        CapabilitySummary {
            platform: self.platform,
            display_name: self.platform.display_name().to_string(),
            dimensions: self
                .fields()
                .filter(|f| f.role.allows_dimension())
                .map(describe)
                .collect(),
            metrics: self
                .fields()
                .filter(|f| f.role.allows_metric())
                .map(describe)
                .collect(),
            max_lookback_days: self.max_lookback_days,
            max_page_size: self.max_page_size,
            filters: self.filters,
            native_ordering: self.native_ordering,
        }
    }
}

/// Serializable description of one platform, returned by `list_capabilities`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilitySummary {
    pub platform: PlatformId,
    pub display_name: String,
    pub dimensions: Vec<FieldSummary>,
    pub metrics: Vec<FieldSummary>,
    pub max_lookback_days: u32,
    pub max_page_size: u32,
    pub filters: FilterSupport,
    pub native_ordering: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSummary {
    pub name: String,
    pub native: String,
    pub field_type: FieldType,
}

/// The process-wide descriptor set.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    descriptors: BTreeMap<PlatformId, Arc<CapabilityDescriptor>>,
}

impl CapabilityRegistry {
    pub fn new<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = CapabilityDescriptor>,
    {
        Self {
            descriptors: descriptors
                .into_iter()
                .map(|d| (d.platform(), Arc::new(d)))
                .collect(),
        }
    }

    /// Both built-in catalogs with their default limits.
    pub fn builtin() -> Self {
        Self::new(PlatformId::ALL.into_iter().map(CapabilityDescriptor::builtin))
    }

    pub fn get(&self, platform: PlatformId) -> Option<&Arc<CapabilityDescriptor>> {
        self.descriptors.get(&platform)
    }
}
