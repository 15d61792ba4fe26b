//! # Dependency Ranker
//!
//! Decides the order in which pending operations are drained.
//!
//! ## Ordering Key
//! ```text
//! (table rank ASC, kind rank ASC, enqueued_at ASC, id ASC)
//!
//!   table rank:  categorias 0 · vendedores 1 · productos 2 · ventas 3
//!                detalle_ventas 4 · anything undeclared 5
//!   kind rank:   create 0 · modify 1 · remove 2
//! ```
//!
//! Ranks come from a declared list, not from the reference graph. The list
//! is checked against the schema once with [`DependencyRanker::check_against`];
//! a reference cycle cannot be expressed as a valid list and is reported
//! there instead of being resolved.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::operation::OperationKind;
use crate::schema::SchemaDescriptor;

/// Declared table ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRanker {
    order: Vec<String>,
    ranks: HashMap<String, u32>,
}

impl DependencyRanker {
    /// Ranks tables by their position in `order`. Parents go first.
    pub fn from_order<I, S>(order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for table in order {
            let table = table.into();
            if !list.contains(&table) {
                list.push(table);
            }
        }
        let ranks = list
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();

        DependencyRanker { order: list, ranks }
    }

    /// Ranking for [`SchemaDescriptor::pos_default`].
    pub fn pos_default() -> Self {
        Self::from_order([
            "categorias",
            "vendedores",
            "productos",
            "ventas",
            "detalle_ventas",
        ])
    }

    /// Rank of a table. Undeclared tables rank after every declared one.
    pub fn rank(&self, target: &str) -> u32 {
        self.ranks.get(target).copied().unwrap_or(self.fallback_rank())
    }

    /// Rank shared by all undeclared tables.
    pub fn fallback_rank(&self) -> u32 {
        self.order.len() as u32
    }

    /// Sub-rank within a table: creations before modifications before removals.
    pub fn kind_rank(kind: OperationKind) -> u32 {
        match kind {
            OperationKind::Create => 0,
            OperationKind::Modify => 1,
            OperationKind::Remove => 2,
        }
    }

    /// Declared tables with their ranks, lowest first.
    pub fn ranked_tables(&self) -> impl Iterator<Item = (&str, u32)> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i as u32))
    }

    /// Verifies that every referenced table ranks strictly before the table
    /// referencing it.
    ///
    /// ## Returns
    /// * `Err(CoreError::RankingViolation)` - first offending reference found
    pub fn check_against(&self, schema: &SchemaDescriptor) -> CoreResult<()> {
        for table in schema.tables() {
            let own = self.rank(table.name());
            for referenced in table.referenced_tables() {
                if referenced == table.name() || self.rank(referenced) >= own {
                    return Err(CoreError::RankingViolation {
                        table: table.name().to_string(),
                        referenced: referenced.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for DependencyRanker {
    fn default() -> Self {
        Self::pos_default()
    }
}
