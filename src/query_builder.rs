// src/query_builder.rs
//! Filtered SELECT/COUNT builder with PostgreSQL `$n` placeholders.
//!
//! Values are always bound as text parameters; conditions that compare
//! against typed columns cast the placeholder (`$1::uuid`, `$2::date`).
//! Identifiers are checked so only plain column names reach the SQL text.

use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::FromRow;
use uuid::Uuid;

pub struct SafeQueryBuilder {
    from: String,
    conditions: Vec<String>,
    params: Vec<String>,
    order_by: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl SafeQueryBuilder {
    /// `from` is trusted SQL (a table plus optional joins) written by the caller.
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            conditions: Vec::new(),
            params: Vec::new(),
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    fn next_placeholder(&mut self, value: String) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    // ==================== CONDITIONS ====================

    /// field = $n
    pub fn add_exact_match(&mut self, field: &str, value: impl Into<String>) -> &mut Self {
        if is_safe_field_name(field) {
            let p = self.next_placeholder(value.into());
            self.conditions.push(format!("{} = {}", field, p));
        }
        self
    }

    pub fn add_optional_match(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.add_exact_match(field, v);
        }
        self
    }

    /// field = $n::uuid
    pub fn add_uuid(&mut self, field: &str, value: Option<Uuid>) -> &mut Self {
        if let Some(id) = value {
            if is_safe_field_name(field) {
                let p = self.next_placeholder(id.to_string());
                self.conditions.push(format!("{} = {}::uuid", field, p));
            }
        }
        self
    }

    /// Inclusive date range on a DATE (or castable) column.
    pub fn add_date_range(
        &mut self,
        field: &str,
        desde: Option<NaiveDate>,
        hasta: Option<NaiveDate>,
    ) -> &mut Self {
        if !is_safe_field_name(field) {
            return self;
        }
        if let Some(from) = desde {
            let p = self.next_placeholder(from.to_string());
            self.conditions.push(format!("{} >= {}::date", field, p));
        }
        if let Some(to) = hasta {
            let p = self.next_placeholder(to.to_string());
            self.conditions.push(format!("{} <= {}::date", field, p));
        }
        self
    }

    /// Case-insensitive substring search across several columns sharing one placeholder.
    pub fn add_search(&mut self, fields: &[&str], term: Option<&str>) -> &mut Self {
        let term = match term.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t,
            None => return self,
        };
        let fields: Vec<&str> = fields.iter().copied().filter(|f| is_safe_field_name(f)).collect();
        if fields.is_empty() {
            return self;
        }

        let p = self.next_placeholder(format!("%{}%", escape_like_value(term)));
        let clauses: Vec<String> = fields
            .iter()
            .map(|f| format!("COALESCE({}, '') ILIKE {}", f, p))
            .collect();
        self.conditions.push(format!("({})", clauses.join(" OR ")));
        self
    }

    /// Condition without parameters, e.g. `e.deleted_at IS NULL`.
    pub fn add_raw_condition(&mut self, condition: &str) -> &mut Self {
        self.conditions.push(condition.to_string());
        self
    }

    // ==================== ORDER AND PAGINATION ====================

    pub fn order_by(&mut self, field: &str, order: &str) -> &mut Self {
        if is_safe_field_name(field) {
            self.order_by = Some(format!("{} {}", field, normalize_sort_order(order)));
        }
        self
    }

    pub fn paginate(&mut self, limit: i64, offset: i64) -> &mut Self {
        self.limit = Some(limit.max(1));
        self.offset = Some(offset.max(0));
        self
    }

    // ==================== BUILD ====================

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn build_select(&self, fields: &str) -> (String, Vec<String>) {
        let mut sql = format!("SELECT {} FROM {}{}", fields, self.from, self.where_clause());

        if let Some(ref order) = self.order_by {
            sql.push_str(&format!(" ORDER BY {}", order));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        (sql, self.params.clone())
    }

    pub fn build_count(&self) -> (String, Vec<String>) {
        (
            format!("SELECT COUNT(*) FROM {}{}", self.from, self.where_clause()),
            self.params.clone(),
        )
    }
}

// ==================== EXECUTION ====================

pub async fn fetch_all<T>(pool: &PgPool, sql: &str, params: &[String]) -> Result<Vec<T>, sqlx::Error>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    let mut query = sqlx::query_as::<_, T>(sql);
    for param in params {
        query = query.bind(param);
    }
    query.fetch_all(pool).await
}

pub async fn fetch_count(pool: &PgPool, sql: &str, params: &[String]) -> Result<i64, sqlx::Error> {
    let mut query = sqlx::query_scalar::<_, i64>(sql);
    for param in params {
        query = query.bind(param);
    }
    query.fetch_one(pool).await
}

/// Column names, optionally qualified by a table alias (`e.nombre`).
pub fn is_safe_field_name(field: &str) -> bool {
    !field.is_empty()
        && field.len() <= 64
        && field.split('.').count() <= 2
        && field.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

pub fn escape_like_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub fn normalize_sort_order(order: &str) -> &'static str {
    match order.to_uppercase().as_str() {
        "ASC" => "ASC",
        _ => "DESC",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_numbered_in_order() {
        let id = Uuid::new_v4();
        let mut builder = SafeQueryBuilder::new("alertas a");
        builder
            .add_uuid("a.id_estudiante", Some(id))
            .add_optional_match("a.estado", Some("activa"))
            .add_optional_match("a.prioridad", None);

        let (sql, params) = builder.build_select("a.*");
        assert_eq!(
            sql,
            "SELECT a.* FROM alertas a WHERE a.id_estudiante = $1::uuid AND a.estado = $2"
        );
        assert_eq!(params, vec![id.to_string(), "activa".to_string()]);
    }

    #[test]
    fn test_search_reuses_single_placeholder() {
        let mut builder = SafeQueryBuilder::new("estudiantes e");
        builder
            .add_raw_condition("e.deleted_at IS NULL")
            .add_search(&["e.nombre", "e.rut"], Some("  50%_off "));

        let (sql, params) = builder.build_count();
        assert!(sql.starts_with("SELECT COUNT(*) FROM estudiantes e WHERE e.deleted_at IS NULL AND ("));
        assert!(sql.contains("COALESCE(e.nombre, '') ILIKE $1 OR COALESCE(e.rut, '') ILIKE $1"));
        assert_eq!(params, vec!["%50\\%\\_off%".to_string()]);
    }

    #[test]
    fn test_blank_filters_are_skipped() {
        let mut builder = SafeQueryBuilder::new("agenda");
        builder
            .add_optional_match("estado", Some("   "))
            .add_search(&["motivo"], Some(""))
            .add_uuid("id_estudiante", None);
        assert_eq!(builder.build_select("*").0, "SELECT * FROM agenda");
    }

    #[test]
    fn test_date_range_and_pagination() {
        let mut builder = SafeQueryBuilder::new("entrevistas");
        builder
            .add_date_range(
                "fecha",
                NaiveDate::from_ymd_opt(2024, 3, 1),
                NaiveDate::from_ymd_opt(2024, 3, 31),
            )
            .order_by("fecha", "asc")
            .paginate(20, 40);

        let (sql, params) = builder.build_select("*");
        assert!(sql.contains("fecha >= $1::date AND fecha <= $2::date"));
        assert!(sql.ends_with("ORDER BY fecha ASC LIMIT 20 OFFSET 40"));
        assert_eq!(params, vec!["2024-03-01".to_string(), "2024-03-31".to_string()]);
    }

    #[test]
    fn test_unsafe_identifiers_are_ignored() {
        let mut builder = SafeQueryBuilder::new("recursos");
        builder
            .add_exact_match("tipo; DROP TABLE recursos", "x")
            .order_by("stock DESC, (SELECT 1)", "asc");
        let (sql, params) = builder.build_select("*");
        assert_eq!(sql, "SELECT * FROM recursos");
        assert!(params.is_empty());
    }

    #[test]
    fn test_field_name_rules() {
        assert!(is_safe_field_name("e.nombre"));
        assert!(is_safe_field_name("fecha_entrega"));
        assert!(!is_safe_field_name("a.b.c"));
        assert!(!is_safe_field_name("1abc"));
        assert!(!is_safe_field_name(""));
    }
}
