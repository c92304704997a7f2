//! The recursive projector: executes a cast plan against a query executor
//! and stitches result rows into nested documents.
//!
//! Execution is single-threaded and depth-first. Every query runs through an
//! acquired statement handle that is released on every exit path; a release
//! failure is logged and ignored, since by then the rows of interest are
//! already materialized (or lost). Any other failure aborts the in-progress
//! root scan while keeping the documents stored so far.

use tracing::{debug, error, instrument, warn};

use crate::cast::convert::convert;
use crate::cast::error::CastError;
use crate::cast::plan::{Cardinality, CastPlan, Selector};
use crate::cast::store::DocumentStore;
use crate::cast::types::{CastConfig, CastOutcome};
use crate::json::{JsonBuilder, ScalarToken};
use crate::source::{QueryExecutor, StatementHandle};

/// Projects root rows and their descendant chains into finished documents.
pub struct Caster {
    config: CastConfig,
}

impl Caster {
    pub fn new(config: CastConfig) -> Self {
        Caster { config }
    }

    /// Run one plan for one tenant. `predicate`, when given, is appended to
    /// the root query as a `WHERE` clause.
    ///
    /// Never panics and never loses finished documents: on failure the
    /// outcome carries the abort cause next to whatever was stored before
    /// it.
    #[instrument(skip_all, fields(doc_type = %plan.doc_type, tenant = %tenant))]
    pub fn run<E: QueryExecutor>(
        &self,
        exec: &mut E,
        plan: &CastPlan,
        tenant: &str,
        predicate: Option<&str>,
    ) -> CastOutcome {
        let mut store = DocumentStore::new();
        match self.scan_roots(exec, plan, tenant, predicate, &mut store) {
            Ok(processed) => CastOutcome {
                store,
                processed,
                error: None,
            },
            Err(err) => {
                error!(%err, "scan aborted; keeping documents produced so far");
                let processed = store.len();
                CastOutcome {
                    store,
                    processed,
                    error: Some(err),
                }
            }
        }
    }

    fn scan_roots<E: QueryExecutor>(
        &self,
        exec: &mut E,
        plan: &CastPlan,
        tenant: &str,
        predicate: Option<&str>,
        store: &mut DocumentStore,
    ) -> Result<usize, CastError> {
        plan.validate()?;
        let query = match predicate {
            Some(predicate) => format!("{} WHERE {}", plan.query, predicate),
            None => plan.query.clone(),
        };

        let handle = exec.acquire()?;
        let fetched = exec.execute(handle, &query);
        self.release_quietly(exec, handle);
        let rows = fetched?;

        let namespace = java_hash(tenant);
        let mut processed = 0;
        for row in &rows.rows {
            let mut doc = self.new_document(0);
            doc.set_scalar(
                &self.config.type_field,
                &ScalarToken::Text(plan.doc_type.clone()),
            )?;
            doc.set_scalar(
                &self.config.tenant_field,
                &ScalarToken::Text(tenant.to_string()),
            )?;

            let mut natural_id = None;
            for (index, column) in rows.columns.iter().enumerate() {
                let token = convert(column, row.value(index))?;
                if natural_id.is_none() && column.name == plan.key_column {
                    let id = match token.as_ref() {
                        None => return Err(CastError::RootKeyMissing(plan.key_column.clone())),
                        Some(token) => int_key(token).ok_or_else(|| CastError::BadParentKey {
                            column: column.name.clone(),
                            value: token.canonical(),
                        })?,
                    };
                    // The identity field sits immediately before the key
                    // column's own field.
                    doc.set_scalar(
                        &self.config.id_field,
                        &ScalarToken::Text(format!("{}/{}/", id, namespace)),
                    )?;
                    natural_id = Some(id);
                }
                if let Some(token) = token {
                    doc.set_scalar(&column.name, &token)?;
                }
            }
            let id = natural_id.ok_or_else(|| CastError::RootKeyMissing(plan.key_column.clone()))?;

            for chain in &plan.chains.0 {
                self.descend(exec, &chain.0, id, &mut doc, 1)?;
            }

            store.put(id, doc.render());
            processed += 1;
            debug!(id, "stored document");
        }
        Ok(processed)
    }

    /// Project one chain level for one parent row, recursing into the rest
    /// of the chain before each nested document is sealed into its parent.
    fn descend<E: QueryExecutor>(
        &self,
        exec: &mut E,
        levels: &[Selector],
        parent_key: i64,
        parent: &mut JsonBuilder,
        depth: usize,
    ) -> Result<(), CastError> {
        let Some((current, rest)) = levels.split_first() else {
            return Ok(());
        };
        let next_key_column = rest.first().map(|selector| selector.key_column.as_str());

        let handle = exec.acquire_prepared(&current.query)?;
        let fetched = exec.execute_prepared(handle, parent_key);
        self.release_quietly(exec, handle);
        let rows = fetched?;

        if current.cardinality == Cardinality::Single && rows.rows.len() > 1 {
            return Err(CastError::SingleWithManyRows {
                label: current.label.clone(),
                rows: rows.rows.len(),
            });
        }

        let mut appended = 0;
        for row in &rows.rows {
            // The label opens lazily: zero child rows leave the parent
            // without the field entirely.
            if appended == 0 {
                match current.cardinality {
                    Cardinality::Many => parent.open_array(&current.label)?,
                    Cardinality::Single => parent.set_object(&current.label)?,
                }
            }

            let mut child = self.new_document(depth);
            let mut next_key = None;
            for (index, column) in rows.columns.iter().enumerate() {
                let token = convert(column, row.value(index))?;
                if let Some(token) = token {
                    if next_key.is_none() && next_key_column == Some(column.name.as_str()) {
                        next_key =
                            Some(int_key(&token).ok_or_else(|| CastError::BadParentKey {
                                column: column.name.clone(),
                                value: token.canonical(),
                            })?);
                    }
                    child.set_scalar(&column.name, &token)?;
                }
            }

            // A declared next level without a usable key in this row simply
            // does not recurse.
            if let Some(key) = next_key {
                self.descend(exec, rest, key, &mut child, depth + 1)?;
            }

            parent.append_element(&child.render());
            appended += 1;
        }

        if appended > 0 && current.cardinality == Cardinality::Many {
            parent.close_array();
        }
        Ok(())
    }

    fn new_document(&self, depth: usize) -> JsonBuilder {
        if self.config.pretty {
            JsonBuilder::pretty(depth)
        } else {
            JsonBuilder::single_line()
        }
    }

    fn release_quietly<E: QueryExecutor>(&self, exec: &mut E, handle: StatementHandle) {
        if let Err(err) = exec.release(handle) {
            warn!(%err, slot = handle.index(), "failed to release statement handle");
        }
    }
}

/// Key extracted from a converted token, if it is integral.
fn int_key(token: &ScalarToken) -> Option<i64> {
    match token {
        ScalarToken::Int(v) => Some(*v),
        ScalarToken::Decimal(s) | ScalarToken::Text(s) => s.parse().ok(),
        ScalarToken::Date(_) => None,
    }
}

/// The 31-multiplier polynomial string hash over UTF-16 code units in
/// wrapping signed 32-bit arithmetic: `java.lang.String::hashCode`. Document
/// identities namespace the tenant with this hash, so ids stay stable for
/// stores first filled by JVM-based exports.
fn java_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SqliteExecutor;

    // java_hash("ACME")
    const ACME_NS: i32 = 2003258;

    fn exec_with(batch: &str) -> SqliteExecutor {
        let exec = SqliteExecutor::open_memory().unwrap();
        exec.connection().execute_batch(batch).unwrap();
        exec
    }

    fn plan(text: &str) -> CastPlan {
        CastPlan::from_json(text).unwrap()
    }

    fn run(exec: &mut SqliteExecutor, plan: &CastPlan) -> CastOutcome {
        Caster::new(CastConfig::default()).run(exec, plan, "ACME", None)
    }

    fn customers_fixture() -> SqliteExecutor {
        exec_with(
            "BEGIN;
             CREATE TABLE customer (id_customer INTEGER, firstname VARCHAR(32));
             CREATE TABLE address (id_address INTEGER, id_customer INTEGER, city VARCHAR(32));
             INSERT INTO customer VALUES (10, 'Alice'), (20, 'Bob');
             INSERT INTO address VALUES (100, 10, 'Lyon');
             COMMIT;",
        )
    }

    fn customers_plan() -> CastPlan {
        plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_customer",
                "query": "SELECT * FROM customer ORDER BY id_customer",
                "chains": [
                    [
                        {
                            "key_column": "id_customer",
                            "label": "addresses",
                            "query": "SELECT id_address, city FROM address WHERE id_customer = ? ORDER BY id_address",
                            "cardinality": "many"
                        }
                    ]
                ]
            }"#,
        )
    }

    #[test]
    fn test_java_hash_reference_values() {
        assert_eq!(java_hash(""), 0);
        assert_eq!(java_hash("a"), 97);
        assert_eq!(java_hash("ACME"), ACME_NS);
    }

    #[test]
    fn test_identity_fields_and_order() {
        let mut exec = exec_with(
            "CREATE TABLE customer (id_customer INTEGER, firstname VARCHAR(32));
             INSERT INTO customer VALUES (10, 'Alice');",
        );
        let plan = plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_customer",
                "query": "SELECT id_customer, firstname FROM customer"
            }"#,
        );
        let outcome = run(&mut exec, &plan);

        assert!(outcome.is_complete());
        assert_eq!(outcome.processed, 1);
        assert_eq!(
            outcome.store.get(10).unwrap(),
            "{ \"document_type\": \"customers\", \"shop_name\": \"ACME\", \
             \"_id\": \"10/2003258/\", \"id_customer\": 10, \"firstname\": \"Alice\"}"
        );
    }

    #[test]
    fn test_null_columns_are_omitted() {
        let mut exec = exec_with(
            "CREATE TABLE customer (id_customer INTEGER, firstname VARCHAR(32), lastname VARCHAR(32));
             INSERT INTO customer VALUES (10, 'Alice', NULL);",
        );
        let plan = plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_customer",
                "query": "SELECT * FROM customer"
            }"#,
        );
        let outcome = run(&mut exec, &plan);
        let doc = outcome.store.get(10).unwrap();
        assert!(!doc.contains("lastname"));
        assert!(!doc.contains("null"));
    }

    #[test]
    fn test_many_chain_array_and_absence() {
        let mut exec = customers_fixture();
        let outcome = run(&mut exec, &customers_plan());

        assert!(outcome.is_complete());
        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.store.len(), 2);

        assert_eq!(
            outcome.store.get(10).unwrap(),
            "{ \"document_type\": \"customers\", \"shop_name\": \"ACME\", \
             \"_id\": \"10/2003258/\", \"id_customer\": 10, \"firstname\": \"Alice\", \
             \"addresses\": [ { \"id_address\": 100, \"city\": \"Lyon\"} ]}"
        );
        // Zero child rows: the field is absent, not an empty array
        let bob = outcome.store.get(20).unwrap();
        assert!(!bob.contains("addresses"));
    }

    #[test]
    fn test_array_elements_follow_query_order() {
        let mut exec = customers_fixture();
        exec.connection()
            .execute_batch(
                "INSERT INTO address VALUES (101, 10, 'Paris'), (102, 10, 'Nice');",
            )
            .unwrap();
        let outcome = run(&mut exec, &customers_plan());

        let doc = outcome.store.get(10).unwrap();
        let lyon = doc.find("Lyon").unwrap();
        let paris = doc.find("Paris").unwrap();
        let nice = doc.find("Nice").unwrap();
        assert!(lyon < paris && paris < nice);
    }

    fn orders_fixture() -> SqliteExecutor {
        exec_with(
            "BEGIN;
             CREATE TABLE ord (id_order INTEGER);
             CREATE TABLE invoice (id_invoice INTEGER, id_order INTEGER, total DECIMAL(20,6));
             CREATE TABLE payment (id_payment INTEGER, id_invoice INTEGER, amount DECIMAL(20,6));
             INSERT INTO ord VALUES (1);
             INSERT INTO invoice VALUES (500, 1, 99.5), (NULL, 1, 10);
             INSERT INTO payment VALUES (9000, 500, 50.0);
             COMMIT;",
        )
    }

    #[test]
    fn test_two_level_descent_gated_on_next_key() {
        let mut exec = orders_fixture();
        // Each level names the parent-row column carrying its key, so the
        // payments level is keyed by id_invoice
        let plan = plan(
            r#"{
                "doc_type": "orders",
                "key_column": "id_order",
                "query": "SELECT * FROM ord",
                "chains": [
                    [
                        {
                            "key_column": "id_order",
                            "label": "invoices",
                            "query": "SELECT id_invoice, total FROM invoice WHERE id_order = ? ORDER BY total DESC",
                            "cardinality": "many"
                        },
                        {
                            "key_column": "id_invoice",
                            "label": "payments",
                            "query": "SELECT id_payment, amount FROM payment WHERE id_invoice = ?",
                            "cardinality": "many"
                        }
                    ]
                ]
            }"#,
        );
        let outcome = run(&mut exec, &plan);

        assert!(outcome.is_complete());
        // The NULL-keyed invoice renders without a nested payments field
        assert_eq!(
            outcome.store.get(1).unwrap(),
            "{ \"document_type\": \"orders\", \"shop_name\": \"ACME\", \
             \"_id\": \"1/2003258/\", \"id_order\": 1, \
             \"invoices\": [ { \"id_invoice\": 500, \"total\": 99.5, \
             \"payments\": [ { \"id_payment\": 9000, \"amount\": 50} ]},\
             { \"total\": 10} ]}"
        );
    }

    #[test]
    fn test_descent_skipped_when_key_column_absent() {
        let mut exec = orders_fixture();
        // The invoice query selects no id_invoice at all, so no row can
        // carry the payments key: every invoice renders flat and the run
        // still completes
        let plan = plan(
            r#"{
                "doc_type": "orders",
                "key_column": "id_order",
                "query": "SELECT * FROM ord",
                "chains": [
                    [
                        {
                            "key_column": "id_order",
                            "label": "invoices",
                            "query": "SELECT total FROM invoice WHERE id_order = ? ORDER BY total DESC",
                            "cardinality": "many"
                        },
                        {
                            "key_column": "id_invoice",
                            "label": "payments",
                            "query": "SELECT id_payment, amount FROM payment WHERE id_invoice = ?",
                            "cardinality": "many"
                        }
                    ]
                ]
            }"#,
        );
        let outcome = run(&mut exec, &plan);

        assert!(outcome.is_complete());
        assert_eq!(
            outcome.store.get(1).unwrap(),
            "{ \"document_type\": \"orders\", \"shop_name\": \"ACME\", \
             \"_id\": \"1/2003258/\", \"id_order\": 1, \
             \"invoices\": [ { \"total\": 99.5},{ \"total\": 10} ]}"
        );
    }

    #[test]
    fn test_single_cardinality_nests_object() {
        let mut exec = exec_with(
            "BEGIN;
             CREATE TABLE customer (id_customer INTEGER);
             CREATE TABLE grp (id_group INTEGER, id_customer INTEGER, name VARCHAR(32));
             INSERT INTO customer VALUES (10);
             INSERT INTO grp VALUES (3, 10, 'Retail');
             COMMIT;",
        );
        let plan = plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_customer",
                "query": "SELECT * FROM customer",
                "chains": [
                    [
                        {
                            "key_column": "id_customer",
                            "label": "default_group",
                            "query": "SELECT id_group, name FROM grp WHERE id_customer = ?",
                            "cardinality": "single"
                        }
                    ]
                ]
            }"#,
        );
        let outcome = run(&mut exec, &plan);
        assert_eq!(
            outcome.store.get(10).unwrap(),
            "{ \"document_type\": \"customers\", \"shop_name\": \"ACME\", \
             \"_id\": \"10/2003258/\", \"id_customer\": 10, \
             \"default_group\": { \"id_group\": 3, \"name\": \"Retail\"}}"
        );
    }

    #[test]
    fn test_single_cardinality_rejects_second_row() {
        let mut exec = exec_with(
            "BEGIN;
             CREATE TABLE customer (id_customer INTEGER);
             CREATE TABLE grp (id_group INTEGER, id_customer INTEGER, name VARCHAR(32));
             INSERT INTO customer VALUES (10), (20);
             INSERT INTO grp VALUES (3, 10, 'Retail'), (4, 20, 'Retail'), (5, 20, 'Wholesale');
             COMMIT;",
        );
        let plan = plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_customer",
                "query": "SELECT * FROM customer ORDER BY id_customer",
                "chains": [
                    [
                        {
                            "key_column": "id_customer",
                            "label": "default_group",
                            "query": "SELECT id_group, name FROM grp WHERE id_customer = ?",
                            "cardinality": "single"
                        }
                    ]
                ]
            }"#,
        );
        let outcome = run(&mut exec, &plan);

        // Customer 10 finished before customer 20 violated the contract
        assert_eq!(outcome.processed, 1);
        assert!(outcome.store.get(10).is_some());
        assert!(outcome.store.get(20).is_none());
        assert!(matches!(
            outcome.error,
            Some(CastError::SingleWithManyRows { ref label, rows: 2 }) if label == "default_group"
        ));
    }

    #[test]
    fn test_unmapped_type_on_third_of_five_roots() {
        let mut exec = exec_with(
            "BEGIN;
             CREATE TABLE customer (id_customer INTEGER, firstname VARCHAR(32));
             CREATE TABLE note (id_note INTEGER, id_customer INTEGER, payload BLOB);
             INSERT INTO customer VALUES (1, 'a'), (2, 'b'), (3, 'c'), (4, 'd'), (5, 'e');
             INSERT INTO note VALUES (1, 3, x'0102');
             COMMIT;",
        );
        let plan = plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_customer",
                "query": "SELECT * FROM customer ORDER BY id_customer",
                "chains": [
                    [
                        {
                            "key_column": "id_customer",
                            "label": "notes",
                            "query": "SELECT id_note, payload FROM note WHERE id_customer = ?",
                            "cardinality": "many"
                        }
                    ]
                ]
            }"#,
        );
        let outcome = run(&mut exec, &plan);

        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.store.len(), 2);
        assert!(outcome.store.get(1).is_some());
        assert!(outcome.store.get(2).is_some());
        assert!(outcome.store.get(3).is_none());
        assert!(matches!(
            outcome.error,
            Some(CastError::UnsupportedColumnType { ref column, .. }) if column == "payload"
        ));
    }

    #[test]
    fn test_missing_root_key_aborts() {
        let mut exec = exec_with(
            "CREATE TABLE customer (id_customer INTEGER, firstname VARCHAR(32));
             INSERT INTO customer VALUES (10, 'Alice');",
        );
        let plan = plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_client",
                "query": "SELECT id_customer, firstname FROM customer"
            }"#,
        );
        let outcome = run(&mut exec, &plan);
        assert_eq!(outcome.processed, 0);
        assert!(outcome.store.is_empty());
        assert!(matches!(outcome.error, Some(CastError::RootKeyMissing(_))));
    }

    #[test]
    fn test_null_root_key_aborts() {
        let mut exec = exec_with(
            "CREATE TABLE customer (id_customer INTEGER, firstname VARCHAR(32));
             INSERT INTO customer VALUES (NULL, 'Zed');",
        );
        let plan = plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_customer",
                "query": "SELECT * FROM customer"
            }"#,
        );
        let outcome = run(&mut exec, &plan);
        assert!(matches!(outcome.error, Some(CastError::RootKeyMissing(_))));
    }

    #[test]
    fn test_duplicate_column_name_rejected() {
        let mut exec = exec_with(
            "CREATE TABLE customer (id_customer INTEGER);
             INSERT INTO customer VALUES (10);",
        );
        let plan = plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_customer",
                "query": "SELECT id_customer, id_customer FROM customer"
            }"#,
        );
        let outcome = run(&mut exec, &plan);
        assert!(matches!(outcome.error, Some(CastError::Duplicate(_))));
    }

    #[test]
    fn test_predicate_narrows_root_scan() {
        let mut exec = customers_fixture();
        // The predicate lands as a WHERE clause, so the root query carries
        // no clause of its own
        let plan = plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_customer",
                "query": "SELECT * FROM customer"
            }"#,
        );
        let outcome = Caster::new(CastConfig::default()).run(
            &mut exec,
            &plan,
            "ACME",
            Some("id_customer = 20"),
        );
        assert!(outcome.is_complete());
        assert_eq!(outcome.store.len(), 1);
        assert!(outcome.store.get(20).is_some());
    }

    #[test]
    fn test_timestamps_render_as_isodate() {
        let mut exec = exec_with(
            "CREATE TABLE customer (id_customer INTEGER, date_add DATETIME, birthday DATE);
             INSERT INTO customer VALUES (10, '2017-03-20 10:15:30', '1990-01-02');",
        );
        let plan = plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_customer",
                "query": "SELECT * FROM customer"
            }"#,
        );
        let outcome = run(&mut exec, &plan);
        let doc = outcome.store.get(10).unwrap();
        assert!(doc.contains("\"date_add\": ISODate(\"2017-03-20T10:15:30Z\")"));
        assert!(doc.contains("\"birthday\": ISODate(\"1990-01-02T00:00:00Z\")"));
    }

    #[test]
    fn test_escaped_text_round_trips_through_json() {
        let mut exec = exec_with(
            "CREATE TABLE customer (id_customer INTEGER, firstname VARCHAR(32), note TEXT);
             INSERT INTO customer VALUES (10, 'Al\"ce', 'a' || char(9) || 'b');",
        );
        let plan = plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_customer",
                "query": "SELECT * FROM customer"
            }"#,
        );
        let outcome = run(&mut exec, &plan);
        let doc = outcome.store.get(10).unwrap();

        // No date fields, so the document is plain JSON
        let parsed: serde_json::Value = serde_json::from_str(doc).unwrap();
        assert_eq!(parsed["firstname"], "Al\"ce");
        assert_eq!(parsed["note"], "a\tb");
    }

    #[test]
    fn test_pretty_mode_layout() {
        let mut exec = exec_with(
            "CREATE TABLE customer (id_customer INTEGER, firstname VARCHAR(32));
             INSERT INTO customer VALUES (10, 'Alice');",
        );
        let plan = plan(
            r#"{
                "doc_type": "customers",
                "key_column": "id_customer",
                "query": "SELECT id_customer, firstname FROM customer"
            }"#,
        );
        let config = CastConfig {
            pretty: true,
            ..CastConfig::default()
        };
        let outcome = Caster::new(config).run(&mut exec, &plan, "ACME", None);
        assert_eq!(
            outcome.store.get(10).unwrap(),
            "{\n\t\"document_type\": \"customers\",\n\t\"shop_name\": \"ACME\",\n\t\"_id\": \
             \"10/2003258/\",\n\t\"id_customer\": 10,\n\t\"firstname\": \"Alice\"\n}"
        );
    }

    #[test]
    fn test_statement_slots_recycled_across_rows() {
        let mut exec = customers_fixture();
        let outcome = run(&mut exec, &customers_plan());
        assert!(outcome.is_complete());
        // 5 prewarmed plain slots plus one prepared slot reused for both
        // root rows; nothing left busy
        assert_eq!(exec.slot_count(), 6);
    }
}
