pub mod validate;

use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Structured analytics query in the engine's REST shape.
///
/// Unknown keys are rejected. `limit` is required here; the synthesizer injects
/// the configured default before deserializing model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QuerySpecification {
    #[serde(default)]
    pub measures: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub segments: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub time_dimensions: Vec<TimeDimension>,
    #[serde(default, skip_serializing_if = "Order::is_empty")]
    pub order: Order,
    pub limit: NonZeroU64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Measure,
    Dimension,
    Segment,
    Filter,
    TimeDimension,
    Order,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberRole::Measure => "measures",
            MemberRole::Dimension => "dimensions",
            MemberRole::Segment => "segments",
            MemberRole::Filter => "filters",
            MemberRole::TimeDimension => "timeDimensions",
            MemberRole::Order => "order",
        };
        f.write_str(name)
    }
}

/// A member reference and the part of the query it appears in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub member: &'a str,
    pub role: MemberRole,
}

impl QuerySpecification {
    pub fn member_refs(&self) -> Vec<MemberRef<'_>> {
        let mut refs = Vec::new();
        refs.extend(self.measures.iter().map(|m| MemberRef {
            member: m,
            role: MemberRole::Measure,
        }));
        refs.extend(self.dimensions.iter().map(|m| MemberRef {
            member: m,
            role: MemberRole::Dimension,
        }));
        refs.extend(self.segments.iter().map(|m| MemberRef {
            member: m,
            role: MemberRole::Segment,
        }));
        for filter in &self.filters {
            filter.collect_members(&mut refs);
        }
        refs.extend(self.time_dimensions.iter().map(|td| MemberRef {
            member: &td.dimension,
            role: MemberRole::TimeDimension,
        }));
        refs.extend(self.order.iter().map(|(member, _)| MemberRef {
            member,
            role: MemberRole::Order,
        }));
        refs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    Member(MemberFilter),
    Or(OrFilter),
    And(AndFilter),
}

impl Filter {
    fn collect_members<'a>(&'a self, refs: &mut Vec<MemberRef<'a>>) {
        match self {
            Filter::Member(filter) => refs.push(MemberRef {
                member: &filter.member,
                role: MemberRole::Filter,
            }),
            Filter::Or(group) => group.or.iter().for_each(|f| f.collect_members(refs)),
            Filter::And(group) => group.and.iter().for_each(|f| f.collect_members(refs)),
        }
    }

    /// Member filters whose operator needs values but carry none.
    pub fn missing_values(&self) -> Vec<&MemberFilter> {
        match self {
            Filter::Member(filter) if filter.operator.requires_values() && filter.values.is_empty() => {
                vec![filter]
            }
            Filter::Member(_) => Vec::new(),
            Filter::Or(group) => group.or.iter().flat_map(Filter::missing_values).collect(),
            Filter::And(group) => group.and.iter().flat_map(Filter::missing_values).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberFilter {
    pub member: String,
    pub operator: FilterOperator,
    #[serde(
        default,
        deserialize_with = "deserialize_filter_values",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrFilter {
    pub or: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AndFilter {
    pub and: Vec<Filter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    Set,
    NotSet,
    InDateRange,
    NotInDateRange,
    BeforeDate,
    BeforeOrOnDate,
    AfterDate,
    AfterOrOnDate,
    MeasureFilter,
}

impl FilterOperator {
    pub fn requires_values(self) -> bool {
        !matches!(
            self,
            FilterOperator::Set | FilterOperator::NotSet | FilterOperator::MeasureFilter
        )
    }
}

// The engine wants string values; models often emit bare numbers or booleans.
fn deserialize_filter_values<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    values
        .into_iter()
        .map(|value| match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "filter values must be scalars, got {other}"
            ))),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimeDimension {
    pub dimension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<Granularity>,
}

/// Either a relative phrase such as `"last 7 days"` or an inclusive `[start, end]` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateRange {
    Relative(String),
    Absolute([String; 2]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// `member -> asc|desc`, keeping the order the keys were given in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Order(Vec<(String, SortDirection)>);

impl Order {
    pub fn iter(&self) -> impl Iterator<Item = (&str, SortDirection)> {
        self.0.iter().map(|(member, dir)| (member.as_str(), *dir))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Map<String, Value>> for Order {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        map.into_iter()
            .map(|(member, value)| {
                serde_json::from_value::<SortDirection>(value.clone())
                    .map(|dir| (member.clone(), dir))
                    .map_err(|_| format!("order for {member} must be \"asc\" or \"desc\", got {value}"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Order)
    }
}

impl From<Order> for Map<String, Value> {
    fn from(order: Order) -> Self {
        order
            .0
            .into_iter()
            .map(|(member, dir)| {
                let dir = match dir {
                    SortDirection::Asc => "asc",
                    SortDirection::Desc => "desc",
                };
                (member, Value::String(dir.to_string()))
            })
            .collect()
    }
}
