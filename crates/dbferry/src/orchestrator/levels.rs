//! Dependency leveling of tables by foreign-key references.
//!
//! Levels are multiples of 100: tables with no references (or only a
//! self-reference) get 100, tables whose references are all leveled get the
//! next pass's level. Tables still unleveled after the last pass are part of
//! (or depend on) an unresolved reference cycle; they get level 0 and run
//! first. That ordering can violate their references and is reported, not
//! treated as an error.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::warn;

use crate::core::{Table, TableInfo};

/// Level step between passes.
pub const LEVEL_STEP: i32 = 100;

/// Maximum number of passes.
pub const MAX_PASSES: usize = 100;

/// Anything that can be leveled.
pub trait Leveled {
    fn level_name(&self) -> &str;
    fn level_references(&self) -> &[String];
    fn level(&self) -> i32;
    fn set_level(&mut self, level: i32);

    /// Pull-order weight within a level; heavier first.
    fn level_weight(&self) -> u64 {
        0
    }
}

impl Leveled for Table {
    fn level_name(&self) -> &str {
        &self.name
    }
    fn level_references(&self) -> &[String] {
        &self.references
    }
    fn level(&self) -> i32 {
        self.order
    }
    fn set_level(&mut self, level: i32) {
        self.order = level;
    }
    fn level_weight(&self) -> u64 {
        self.weight()
    }
}

impl Leveled for TableInfo {
    fn level_name(&self) -> &str {
        &self.name
    }
    fn level_references(&self) -> &[String] {
        &self.references
    }
    fn level(&self) -> i32 {
        self.order
    }
    fn set_level(&mut self, level: i32) {
        self.order = level;
    }
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Assign levels in place and return the names of unresolved tables.
///
/// Tables with a configured level above 0 keep it. References to tables
/// outside the list are ignored. Name matching is case-insensitive and
/// accepts either the qualified or the bare table name.
pub fn resolve<T: Leveled>(tables: &mut [T]) -> Vec<String> {
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, t) in tables.iter().enumerate() {
        index.insert(key(t.level_name()), i);
        if let Some((_, bare)) = t.level_name().rsplit_once('.') {
            index.entry(key(bare)).or_insert(i);
        }
    }

    // Resolved reference indices per table, self-references dropped.
    let deps: Vec<Vec<usize>> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let mut deps: Vec<usize> = t
                .level_references()
                .iter()
                .filter_map(|r| index.get(&key(r)).copied())
                .filter(|&d| d != i)
                .collect();
            deps.sort_unstable();
            deps.dedup();
            deps
        })
        .collect();

    let mut levels: Vec<Option<i32>> = tables
        .iter()
        .map(|t| (t.level() > 0).then(|| t.level()))
        .collect();

    // Seed.
    for (i, d) in deps.iter().enumerate() {
        if levels[i].is_none() && d.is_empty() {
            levels[i] = Some(LEVEL_STEP);
        }
    }

    let mut level = LEVEL_STEP;
    for _ in 0..MAX_PASSES {
        level += LEVEL_STEP;
        let ready: Vec<usize> = (0..tables.len())
            .filter(|&i| levels[i].is_none())
            .filter(|&i| deps[i].iter().all(|&d| levels[d].is_some()))
            .collect();
        if ready.is_empty() {
            break;
        }
        for i in ready {
            // A configured dependency level can exceed the pass level.
            let floor = deps[i]
                .iter()
                .filter_map(|&d| levels[d])
                .max()
                .map_or(level, |m| m + LEVEL_STEP);
            levels[i] = Some(level.max(floor));
        }
    }

    let mut unresolved = Vec::new();
    for (t, l) in tables.iter_mut().zip(levels) {
        match l {
            Some(l) => t.set_level(l),
            None => {
                t.set_level(0);
                unresolved.push(t.level_name().to_string());
            }
        }
    }

    if !unresolved.is_empty() {
        warn!(
            "Unresolved references (cycle) for {} tables, running them first: {}",
            unresolved.len(),
            unresolved.join(", ")
        );
    }
    unresolved
}

/// Group leveled tables into ascending levels. Within a level tables are
/// ordered by weight (descending), then name.
pub fn group_levels<T: Leveled>(mut tables: Vec<T>) -> Vec<(i32, Vec<T>)> {
    tables.sort_by(|a, b| {
        a.level()
            .cmp(&b.level())
            .then_with(|| b.level_weight().cmp(&a.level_weight()))
            .then_with(|| compare_names(a.level_name(), b.level_name()))
    });

    let mut groups: Vec<(i32, Vec<T>)> = Vec::new();
    for t in tables {
        match groups.last_mut() {
            Some((level, group)) if *level == t.level() => group.push(t),
            _ => groups.push((t.level(), vec![t])),
        }
    }
    groups
}

fn compare_names(a: &str, b: &str) -> Ordering {
    key(a).cmp(&key(b)).then_with(|| a.cmp(b))
}

/// Merge discovered foreign-key references into configured tables.
///
/// A configured table picks up the references of the discovered table with
/// the same (qualified or bare) name. Configured references are kept. Key
/// fields are never merged: they select the paging mode.
pub fn merge_references(tables: &mut [Table], discovered: &[TableInfo]) {
    let mut by_name: HashMap<String, &TableInfo> = HashMap::new();
    for info in discovered {
        by_name.insert(key(&info.full_name()), info);
        by_name.entry(key(&info.name)).or_insert(info);
    }

    for table in tables.iter_mut() {
        let bare = table
            .name
            .rsplit_once('.')
            .map_or(table.name.as_str(), |(_, b)| b);
        let found = by_name
            .get(&key(&table.name))
            .or_else(|| by_name.get(&key(bare)));
        if let Some(info) = found {
            for r in &info.references {
                if !table.references.iter().any(|x| x.eq_ignore_ascii_case(r)) {
                    table.references.push(r.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, refs: &[&str]) -> Table {
        Table::new(name, "id").with_references(refs.iter().copied())
    }

    fn level_of(tables: &[Table], name: &str) -> i32 {
        tables.iter().find(|t| t.name == name).map(|t| t.order).unwrap()
    }

    #[test]
    fn test_reference_chain() {
        let mut tables = vec![table("b", &["a"]), table("a", &[])];
        let unresolved = resolve(&mut tables);
        assert!(unresolved.is_empty());
        assert_eq!(level_of(&tables, "a"), 100);
        assert_eq!(level_of(&tables, "b"), 200);
    }

    #[test]
    fn test_self_reference_is_seeded() {
        let mut tables = vec![table("employees", &["employees"])];
        resolve(&mut tables);
        assert_eq!(tables[0].order, 100);
    }

    #[test]
    fn test_diamond() {
        let mut tables = vec![
            table("d", &["b", "c"]),
            table("c", &["a"]),
            table("b", &["a"]),
            table("a", &[]),
        ];
        resolve(&mut tables);
        assert_eq!(level_of(&tables, "a"), 100);
        assert_eq!(level_of(&tables, "b"), 200);
        assert_eq!(level_of(&tables, "c"), 200);
        assert_eq!(level_of(&tables, "d"), 300);
    }

    #[test]
    fn test_cycle_falls_back_to_level_zero() {
        let mut tables = vec![
            table("a", &[]),
            table("x", &["y"]),
            table("y", &["x"]),
            table("z", &["x"]),
        ];
        let mut unresolved = resolve(&mut tables);
        unresolved.sort();
        assert_eq!(unresolved, vec!["x", "y", "z"]);
        assert_eq!(level_of(&tables, "a"), 100);
        assert_eq!(level_of(&tables, "x"), 0);
        assert_eq!(level_of(&tables, "z"), 0);
    }

    #[test]
    fn test_unknown_references_are_ignored() {
        let mut tables = vec![table("orders", &["customers_archive"])];
        resolve(&mut tables);
        assert_eq!(tables[0].order, 100);
    }

    #[test]
    fn test_configured_level_is_kept() {
        let mut tables = vec![table("a", &[]), table("b", &["a"])];
        tables[0].order = 500;
        resolve(&mut tables);
        assert_eq!(level_of(&tables, "a"), 500);
        assert_eq!(level_of(&tables, "b"), 600);
    }

    #[test]
    fn test_references_match_case_insensitively_and_bare() {
        let mut tables = vec![table("dbo.Customers", &[]), table("dbo.Orders", &["CUSTOMERS"])];
        resolve(&mut tables);
        assert_eq!(level_of(&tables, "dbo.Orders"), 200);
    }

    #[test]
    fn test_every_reference_is_leveled_first() {
        let mut tables = vec![
            table("e", &["d", "a"]),
            table("d", &["c"]),
            table("c", &["b"]),
            table("b", &["a"]),
            table("a", &[]),
        ];
        resolve(&mut tables);
        for t in &tables {
            for r in &t.references {
                assert!(level_of(&tables, r) < t.order, "{} before {}", r, t.name);
            }
        }
    }

    #[test]
    fn test_group_levels_orders_by_weight_then_name() {
        let mut small = table("small", &[]);
        small.total = 10;
        let mut big = table("big", &[]);
        big.total = 1_000;
        let mut tables = vec![small, table("child", &["big"]), big, table("alpha", &[])];
        resolve(&mut tables);

        let groups = group_levels(tables);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, 100);
        let names: Vec<&str> = groups[0].1.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["big", "small", "alpha"]);
        assert_eq!(groups[1].1[0].name, "child");
    }

    #[test]
    fn test_merge_references_from_discovery() {
        let mut info = TableInfo::new("orders");
        info.schema = "public".into();
        info.references = vec!["customers".into()];
        info.key_fields = vec!["id".into()];

        let mut tables = vec![table("public.orders", &["regions"])];
        merge_references(&mut tables, &[info]);
        assert_eq!(tables[0].references, vec!["regions", "customers"]);
        assert!(tables[0].key_fields.is_empty());
    }
}
