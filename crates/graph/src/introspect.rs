//! Tree traversal helpers: printing, structural comparison, parameter lookup.

use std::fmt::Write as _;

use crate::node::{Node, Parameter};

/// Depth-first pre-order traversal; `visit` receives each node and its depth.
pub fn walk<'a>(node: &'a dyn Node, visit: &mut dyn FnMut(&'a dyn Node, usize)) {
    walk_at(node, 0, visit);
}

fn walk_at<'a>(node: &'a dyn Node, depth: usize, visit: &mut dyn FnMut(&'a dyn Node, usize)) {
    visit(node, depth);
    for child in node.children() {
        walk_at(child, depth + 1, visit);
    }
}

/// Every node under `root` (inclusive) whose name is `name`, in pre-order.
pub fn find_all<'a>(root: &'a dyn Node, name: &str) -> Vec<&'a dyn Node> {
    let mut found = Vec::new();
    walk(root, &mut |node, _| {
        if node.name() == name {
            found.push(node);
        }
    });
    found
}

/// Same node types, same structural attributes and same children in the same
/// order. Parameter values are ignored.
pub fn structural_eq(a: &dyn Node, b: &dyn Node) -> bool {
    if a.name() != b.name() || a.structural_attrs() != b.structural_attrs() {
        return false;
    }
    let (left, right) = (a.children(), b.children());
    left.len() == right.len()
        && left
            .iter()
            .zip(right.iter())
            .all(|(l, r)| structural_eq(*l, *r))
}

/// Indented one-line-per-node rendering of the tree.
pub fn describe(root: &dyn Node) -> String {
    let mut out = String::new();
    walk(root, &mut |node, depth| {
        let attrs = node.structural_attrs();
        let _ = write!(out, "{}{}", "  ".repeat(depth), node.name());
        if !attrs.is_empty() {
            let rendered: Vec<String> = attrs
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            let _ = write!(out, "({})", rendered.join(", "));
        }
        out.push('\n');
    });
    out
}

/// Learned parameters under `root`, keyed by child index path
/// (`"0.1.weight"` is the `weight` of child 1 of child 0).
pub fn named_parameters(root: &dyn Node) -> Vec<(String, Parameter)> {
    let mut params = Vec::new();
    collect_parameters(root, "", &mut params);
    params
}

fn collect_parameters(node: &dyn Node, prefix: &str, out: &mut Vec<(String, Parameter)>) {
    for (name, param) in node.own_parameters() {
        out.push((format!("{prefix}{name}"), param));
    }
    for (index, child) in node.children().into_iter().enumerate() {
        collect_parameters(child, &format!("{prefix}{index}."), out);
    }
}

/// Total element count across all parameters under `root`.
pub fn parameter_count(root: &dyn Node) -> candle_core::Result<usize> {
    named_parameters(root)
        .iter()
        .try_fold(0usize, |acc, (_, param)| {
            Ok(acc + param.dims()?.iter().product::<usize>())
        })
}
