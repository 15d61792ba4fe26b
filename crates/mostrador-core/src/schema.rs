//! # Schema Descriptor
//!
//! Static metadata for every table the engine replicates: the identifier
//! column, the declared columns, their value kinds, nullability, and which
//! table a column references. The sanitizer is the only consumer of column
//! kinds; the ranker check and the local writer use names and references.
//!
//! ## Default Point-of-Sale Schema
//! ```text
//! ┌─────────────┐       ┌─────────────┐
//! │ categorias  │       │ vendedores  │
//! └──────┬──────┘       └──────┬──────┘
//!        │ categoria_id        │ vendedor_id
//! ┌──────▼──────┐       ┌──────▼──────┐
//! │  productos  │       │   ventas    │
//! └──────┬──────┘       └──────┬──────┘
//!        │ producto_id         │ venta_id
//!        └────────┐   ┌────────┘
//!              ┌──▼───▼──────────┐
//!              │ detalle_ventas  │
//!              └─────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Column Kinds
// =============================================================================

/// Declared value kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Boolean,
    Integer,
    Decimal,
    Text,
    Timestamp,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Boolean => "boolean",
            ColumnKind::Integer => "integer",
            ColumnKind::Decimal => "decimal",
            ColumnKind::Text => "text",
            ColumnKind::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    /// Table this column points at, if it is a foreign reference.
    pub references: Option<String>,
}

// =============================================================================
// Table Schema
// =============================================================================

/// Declared shape of one replicated table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    id_column: String,
    columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Starts a table with an integer `id` identifier column.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(name, "id")
    }

    /// Starts a table with a custom integer identifier column.
    pub fn with_id(name: impl Into<String>, id_column: impl Into<String>) -> Self {
        let id_column = id_column.into();
        TableSchema {
            name: name.into(),
            columns: vec![ColumnDef {
                name: id_column.clone(),
                kind: ColumnKind::Integer,
                nullable: false,
                references: None,
            }],
            id_column,
        }
    }

    /// Adds a non-nullable column.
    pub fn column(self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.push(name.into(), kind, false, None)
    }

    /// Adds a nullable column.
    pub fn nullable(self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.push(name.into(), kind, true, None)
    }

    /// Adds an integer column referencing another table's identifier.
    pub fn reference(self, name: impl Into<String>, table: impl Into<String>) -> Self {
        self.push(name.into(), ColumnKind::Integer, true, Some(table.into()))
    }

    fn push(
        mut self,
        name: String,
        kind: ColumnKind,
        nullable: bool,
        references: Option<String>,
    ) -> Self {
        self.columns.push(ColumnDef {
            name,
            kind,
            nullable,
            references,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Looks up a declared column.
    pub fn get(&self, column: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == column)
    }

    /// Returns true if `column` is declared on this table.
    pub fn declares(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Tables referenced by this table's columns.
    pub fn referenced_tables(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().filter_map(|c| c.references.as_deref())
    }

    fn validate(&self) -> CoreResult<()> {
        ensure_identifier(&self.name)?;
        for (i, column) in self.columns.iter().enumerate() {
            ensure_identifier(&column.name)?;
            if let Some(ref table) = column.references {
                ensure_identifier(table)?;
            }
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(CoreError::DuplicateColumn {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Schema Descriptor
// =============================================================================

/// All replicated tables, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaDescriptor {
    /// Builds a descriptor, validating every table and column name.
    ///
    /// ## Returns
    /// * `Err(CoreError::InvalidIdentifier)` - a name is not a plain identifier
    /// * `Err(CoreError::DuplicateTable)` / `DuplicateColumn` - declared twice
    pub fn new(tables: impl IntoIterator<Item = TableSchema>) -> CoreResult<Self> {
        let mut map = BTreeMap::new();
        for table in tables {
            table.validate()?;
            let name = table.name.clone();
            if map.insert(name.clone(), table).is_some() {
                return Err(CoreError::DuplicateTable(name));
            }
        }
        Ok(SchemaDescriptor { tables: map })
    }

    /// The five-table point-of-sale catalog.
    pub fn pos_default() -> Self {
        use ColumnKind::*;

        let tables = [
            TableSchema::new("categorias")
                .column("nombre", Text)
                .nullable("descripcion", Text)
                .column("activo", Boolean)
                .nullable("fecha_creacion", Timestamp),
            TableSchema::new("vendedores")
                .column("nombre", Text)
                .column("activo", Boolean)
                .nullable("fecha_creacion", Timestamp),
            TableSchema::new("productos")
                .column("nombre", Text)
                .column("precio", Decimal)
                .reference("categoria_id", "categorias")
                .column("stock", Integer)
                .nullable("descripcion", Text)
                .nullable("codigo_barras", Text)
                .column("activo", Boolean)
                .nullable("fecha_creacion", Timestamp)
                .nullable("fecha_modificacion", Timestamp),
            TableSchema::new("ventas")
                .column("fecha", Timestamp)
                .column("total", Decimal)
                .nullable("subtotal", Decimal)
                .nullable("metodo_pago", Text)
                .reference("vendedor_id", "vendedores")
                .nullable("observaciones", Text)
                .nullable("descuento", Decimal)
                .nullable("impuestos", Decimal),
            TableSchema::new("detalle_ventas")
                .reference("venta_id", "ventas")
                .reference("producto_id", "productos")
                .column("cantidad", Integer)
                .column("precio_unitario", Decimal)
                .column("subtotal", Decimal),
        ];

        // Static declaration above uses only valid, distinct names.
        let tables = tables.into_iter().map(|t| (t.name.clone(), t)).collect();
        SchemaDescriptor { tables }
    }

    /// Looks up a table.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Looks up a table, failing for undeclared targets.
    pub fn require(&self, name: &str) -> CoreResult<&TableSchema> {
        self.table(name)
            .ok_or_else(|| CoreError::UnknownTarget(name.to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }
}

/// Returns true for plain SQL identifiers: `[A-Za-z_][A-Za-z0-9_]*`, at most
/// 63 characters.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Fails with `CoreError::InvalidIdentifier` unless `name` is a plain identifier.
pub fn ensure_identifier(name: &str) -> CoreResult<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(CoreError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pos_default_declares_five_tables() {
        let schema = SchemaDescriptor::pos_default();
        let names: Vec<_> = schema.tables().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec!["categorias", "detalle_ventas", "productos", "vendedores", "ventas"]
        );

        let productos = schema.table("productos").unwrap();
        assert_eq!(productos.id_column(), "id");
        assert_eq!(productos.get("activo").unwrap().kind, ColumnKind::Boolean);
        assert_eq!(productos.get("precio").unwrap().kind, ColumnKind::Decimal);
        assert_eq!(
            productos.referenced_tables().collect::<Vec<_>>(),
            vec!["categorias"]
        );
        assert!(!productos.declares("original_query"));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("detalle_ventas"));
        assert!(is_identifier("_tmp1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("nombre; DROP TABLE x"));
        assert!(!is_identifier("\"quoted\""));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_new_rejects_bad_declarations() {
        let dup_col = TableSchema::new("t")
            .column("a", ColumnKind::Text)
            .column("a", ColumnKind::Integer);
        assert!(matches!(
            SchemaDescriptor::new([dup_col]),
            Err(CoreError::DuplicateColumn { .. })
        ));

        let dup_table = [TableSchema::new("t"), TableSchema::new("t")];
        assert!(matches!(
            SchemaDescriptor::new(dup_table),
            Err(CoreError::DuplicateTable(_))
        ));

        let bad_name = TableSchema::new("t").column("a b", ColumnKind::Text);
        assert!(matches!(
            SchemaDescriptor::new([bad_name]),
            Err(CoreError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_require_unknown_target() {
        let schema = SchemaDescriptor::pos_default();
        assert!(schema.require("ventas").is_ok());
        assert!(matches!(
            schema.require("clientes"),
            Err(CoreError::UnknownTarget(_))
        ));
    }
}
