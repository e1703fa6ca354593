// src/plugins/resolver.rs — Load-order resolution
//
// Fixed point over the catalog: each pass walks records in catalog order and
// appends every record whose dependencies are all already in the output.
// Ties therefore break by discovery order. A pass that appends nothing means
// a cycle or a missing dependency.

use std::collections::HashSet;

use thiserror::Error;

use crate::infra::logger::PLUGIN_TARGET;
use crate::plugins::record::{Dependencies, PluginRecord};

/// A plugin that could not be placed in the load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedPlugin {
    pub name: String,
    /// Dependencies not yet satisfied when resolution stalled.
    pub waiting_on: Vec<String>,
    /// The subset of `waiting_on` that no discovered plugin provides.
    pub missing: Vec<String>,
    /// Set when the dependency list itself could not be read.
    pub malformed: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Circular or missing dependency: {}", describe(.unresolved))]
    CircularOrMissingDependency { unresolved: Vec<UnresolvedPlugin> },
}

impl ResolutionError {
    pub fn unresolved(&self) -> &[UnresolvedPlugin] {
        match self {
            ResolutionError::CircularOrMissingDependency { unresolved } => unresolved,
        }
    }
}

fn describe(unresolved: &[UnresolvedPlugin]) -> String {
    unresolved
        .iter()
        .map(|u| match &u.malformed {
            Some(why) => format!("{} (malformed dependencies: {})", u.name, why),
            None if !u.missing.is_empty() => {
                format!("{} (missing {})", u.name, u.missing.join(", "))
            }
            None => format!("{} (waiting on {})", u.name, u.waiting_on.join(", ")),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Compute the load order as indices into `catalog`.
pub fn resolve(catalog: &[PluginRecord]) -> Result<Vec<usize>, ResolutionError> {
    let mut order: Vec<usize> = Vec::with_capacity(catalog.len());
    let mut placed: HashSet<&str> = HashSet::with_capacity(catalog.len());
    let mut done = vec![false; catalog.len()];

    while order.len() < catalog.len() {
        let mut progress = false;

        for (i, record) in catalog.iter().enumerate() {
            if done[i] {
                continue;
            }
            let ready = match &record.dependencies {
                Dependencies::Declared(deps) => deps.iter().all(|d| placed.contains(d.as_str())),
                Dependencies::Malformed(_) => false,
            };
            if ready {
                tracing::debug!(target: PLUGIN_TARGET, "Added to load order: {}", record.name);
                order.push(i);
                placed.insert(record.name.as_str());
                done[i] = true;
                progress = true;
            }
        }

        if !progress {
            let err = stalled(catalog, &done, &placed);
            tracing::error!(target: PLUGIN_TARGET, "{}", err);
            return Err(err);
        }
    }

    Ok(order)
}

fn stalled(catalog: &[PluginRecord], done: &[bool], placed: &HashSet<&str>) -> ResolutionError {
    let known: HashSet<&str> = catalog.iter().map(|r| r.name.as_str()).collect();

    let unresolved = catalog
        .iter()
        .zip(done)
        .filter(|(_, done)| !**done)
        .map(|(record, _)| {
            let waiting_on: Vec<String> = record
                .dependencies
                .names()
                .iter()
                .filter(|d| !placed.contains(d.as_str()))
                .cloned()
                .collect();
            let missing = waiting_on
                .iter()
                .filter(|d| !known.contains(d.as_str()))
                .cloned()
                .collect();
            let malformed = match &record.dependencies {
                Dependencies::Malformed(why) => Some(why.clone()),
                Dependencies::Declared(_) => None,
            };
            UnresolvedPlugin {
                name: record.name.clone(),
                waiting_on,
                missing,
                malformed,
            }
        })
        .collect();

    ResolutionError::CircularOrMissingDependency { unresolved }
}
