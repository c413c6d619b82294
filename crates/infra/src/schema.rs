//! Statically declared table schemas for persisted records.
//!
//! Each record type gets one `TableSchema` constant. DDL and column lists are
//! generated from it, so there is no per-call introspection of record types.

/// One column of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub nullable: bool,
    pub primary_key: bool,
    pub indexed: bool,
}

impl Column {
    const fn required(name: &'static str, sql_type: &'static str) -> Self {
        Self {
            name,
            sql_type,
            nullable: false,
            primary_key: false,
            indexed: false,
        }
    }

    const fn optional(name: &'static str, sql_type: &'static str) -> Self {
        Self {
            nullable: true,
            ..Self::required(name, sql_type)
        }
    }

    const fn key(self) -> Self {
        Self {
            primary_key: true,
            ..self
        }
    }

    const fn index(self) -> Self {
        Self {
            indexed: true,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub table: &'static str,
    pub columns: &'static [Column],
}

impl TableSchema {
    /// Comma-separated column names in declaration order.
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `$1, $2, ...` placeholders matching [`column_list`](Self::column_list).
    pub fn placeholders(&self) -> String {
        (1..=self.columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn primary_key(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name)
            .collect()
    }

    /// `CREATE TABLE` / `CREATE INDEX` statements, idempotent.
    pub fn ddl(&self) -> Vec<String> {
        let mut defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let null = if c.nullable { "" } else { " NOT NULL" };
                format!("{} {}{}", c.name, c.sql_type, null)
            })
            .collect();

        let pk = self.primary_key();
        if !pk.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        }

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            defs.join(", ")
        )];

        for c in self.columns.iter().filter(|c| c.indexed) {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{col} ON {table} ({col})",
                table = self.table,
                col = c.name
            ));
        }

        statements
    }
}

pub const ACCOUNT_ENTRY: TableSchema = TableSchema {
    table: "account_entry",
    columns: &[
        Column::required("acc_number", "BIGINT").index(),
        Column::required("amount", "NUMERIC(28, 10)"),
        Column::required("transaction_time", "TIMESTAMPTZ"),
        Column::required("transaction_id", "UUID").key(),
        Column::required("transaction_type", "VARCHAR(16)").key(),
        Column::optional("description", "TEXT"),
    ],
};

pub const BALANCE_CACHE: TableSchema = TableSchema {
    table: "balance_cache",
    columns: &[
        Column::required("acc_number", "BIGINT").key(),
        Column::required("balance_amount", "NUMERIC(28, 10)"),
        Column::required("update_time", "TIMESTAMPTZ"),
        Column::required("updated_ref", "VARCHAR(64)"),
    ],
};

pub const TRANSACTIONS: TableSchema = TableSchema {
    table: "transactions",
    columns: &[
        Column::required("transaction_id", "UUID").key(),
        Column::required("instruction_type", "VARCHAR(16)"),
        Column::required("acc_number", "BIGINT").index(),
        Column::required("amount", "NUMERIC(28, 10)"),
        Column::optional("description", "TEXT"),
        Column::optional("parent_transaction_id", "UUID"),
        Column::required("initiate_time", "TIMESTAMPTZ"),
        Column::optional("end_time", "TIMESTAMPTZ"),
        Column::required("status", "VARCHAR(16)"),
        Column::required("error_message", "TEXT"),
    ],
};

/// Every table the stores use, in creation order.
pub const ALL: &[TableSchema] = &[ACCOUNT_ENTRY, BALANCE_CACHE, TRANSACTIONS];
