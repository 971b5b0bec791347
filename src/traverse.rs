use std::collections::HashSet;

use rusqlite::Connection;

use crate::error::StagewiseError;
use crate::ident::Ident;

/// Walks records that reference each other through a parent column
/// (`child.parent_column = parent.id_column`) within one table.
///
/// Traversal happens in process over plain queries, one level at a time, so
/// every failure surfaces as an ordinary error. Records already visited are
/// not visited again, which keeps reference cycles finite.
pub struct TreeWalker<'a> {
    conn: &'a Connection,
    children_sql: String,
}

impl<'a> TreeWalker<'a> {
    pub fn new(conn: &'a Connection, table: &Ident, id_column: &Ident, parent_column: &Ident) -> Self {
        let children_sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY {}",
            id_column, table, parent_column, id_column
        );
        TreeWalker { conn, children_sql }
    }

    pub fn children(&self, id: i64) -> Result<Vec<i64>, StagewiseError> {
        let mut stmt = self.conn.prepare_cached(&self.children_sql)?;
        let ids = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// `root` and everything below it, each descendant listed before its
    /// parent, so deleting in this order never orphans a reference.
    pub fn post_order(&self, root: i64) -> Result<Vec<i64>, StagewiseError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.visit(root, &mut seen, &mut out)?;
        Ok(out)
    }

    /// Post-order over several roots, without repeating shared descendants.
    pub fn post_order_all(&self, roots: &[i64]) -> Result<Vec<i64>, StagewiseError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for &root in roots {
            self.visit(root, &mut seen, &mut out)?;
        }
        Ok(out)
    }

    fn visit(&self, id: i64, seen: &mut HashSet<i64>, out: &mut Vec<i64>) -> Result<(), StagewiseError> {
        if !seen.insert(id) {
            return Ok(());
        }
        for child in self.children(id)? {
            self.visit(child, seen, out)?;
        }
        out.push(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE ir_ui_view (id INTEGER PRIMARY KEY, name TEXT, inherit_id INTEGER);
             INSERT INTO ir_ui_view (id, name, inherit_id) VALUES
                (1, 'base', NULL),
                (2, 'child_a', 1),
                (3, 'child_b', 1),
                (4, 'grandchild', 2),
                (5, 'unrelated', NULL),
                (6, 'loop_a', 7),
                (7, 'loop_b', 6);",
        )
        .unwrap();
        conn
    }

    fn walker(conn: &Connection) -> TreeWalker<'_> {
        TreeWalker::new(
            conn,
            &Ident::parse("ir_ui_view").unwrap(),
            &Ident::parse("id").unwrap(),
            &Ident::parse("inherit_id").unwrap(),
        )
    }

    #[test]
    fn test_children() {
        let conn = setup();
        assert_eq!(walker(&conn).children(1).unwrap(), vec![2, 3]);
        assert!(walker(&conn).children(5).unwrap().is_empty());
    }

    #[test]
    fn test_post_order_lists_descendants_first() {
        let conn = setup();
        assert_eq!(walker(&conn).post_order(1).unwrap(), vec![4, 2, 3, 1]);
        assert_eq!(walker(&conn).post_order(5).unwrap(), vec![5]);
    }

    #[test]
    fn test_cycles_terminate() {
        let conn = setup();
        assert_eq!(walker(&conn).post_order(6).unwrap(), vec![7, 6]);
    }

    #[test]
    fn test_shared_descendants_listed_once() {
        let conn = setup();
        assert_eq!(
            walker(&conn).post_order_all(&[2, 1]).unwrap(),
            vec![4, 2, 3, 1]
        );
    }
}
