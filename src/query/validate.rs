use std::collections::HashMap;

use thiserror::Error;

use super::{FilterOperator, MemberRole, QuerySpecification};
use crate::semantic_layer::{MemberType, SchemaMetadataDocument};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemberError {
    #[error("{role} member `{member}` is not in Table.field form")]
    Malformed { member: String, role: MemberRole },

    #[error("{role} member `{member}` belongs to `{table}`, expected `{expected}`")]
    WrongTable {
        member: String,
        role: MemberRole,
        table: String,
        expected: String,
    },

    #[error("{role} member `{member}` is not among the retrieved columns of `{table}`")]
    Unknown {
        member: String,
        role: MemberRole,
        table: String,
    },

    #[error("{role} member `{member}` is a {actual}, expected {expected}")]
    WrongKind {
        member: String,
        role: MemberRole,
        actual: MemberType,
        expected: &'static str,
    },

    #[error("filter on `{member}` with operator {operator:?} needs at least one value")]
    MissingFilterValues {
        member: String,
        operator: FilterOperator,
    },
}

fn accepts(role: MemberRole, kind: MemberType) -> Result<(), &'static str> {
    let ok = match role {
        MemberRole::Measure => kind == MemberType::Measure,
        MemberRole::Dimension | MemberRole::TimeDimension => kind == MemberType::Dimension,
        MemberRole::Segment => kind == MemberType::Segment,
        MemberRole::Filter | MemberRole::Order => kind != MemberType::Segment,
    };
    if ok {
        return Ok(());
    }
    Err(match role {
        MemberRole::Measure => "a measure",
        MemberRole::Dimension | MemberRole::TimeDimension => "a dimension",
        MemberRole::Segment => "a segment",
        MemberRole::Filter | MemberRole::Order => "a measure or dimension",
    })
}

/// Checks that every member `query` references is a `table_name` column from `columns`
/// used in a position its member type allows.
pub fn validate_members(
    query: &QuerySpecification,
    table_name: &str,
    columns: &[SchemaMetadataDocument],
) -> Result<(), MemberError> {
    let known: HashMap<String, MemberType> = columns
        .iter()
        .filter(|doc| doc.table_name == table_name)
        .map(|doc| (doc.qualified_name(), doc.column_member_type))
        .collect();

    for member_ref in query.member_refs() {
        let member = member_ref.member;
        let role = member_ref.role;
        let (table, field) = member
            .split_once('.')
            .filter(|(table, field)| !table.is_empty() && !field.is_empty())
            .ok_or_else(|| MemberError::Malformed {
                member: member.to_string(),
                role,
            })?;

        if table != table_name {
            return Err(MemberError::WrongTable {
                member: member.to_string(),
                role,
                table: table.to_string(),
                expected: table_name.to_string(),
            });
        }

        let kind = known
            .get(&format!("{table}.{field}"))
            .ok_or_else(|| MemberError::Unknown {
                member: member.to_string(),
                role,
                table: table_name.to_string(),
            })?;

        accepts(role, *kind).map_err(|expected| MemberError::WrongKind {
            member: member.to_string(),
            role,
            actual: *kind,
            expected,
        })?;
    }

    if let Some(filter) = query.filters.iter().flat_map(|f| f.missing_values()).next() {
        return Err(MemberError::MissingFilterValues {
            member: filter.member.clone(),
            operator: filter.operator,
        });
    }

    Ok(())
}
