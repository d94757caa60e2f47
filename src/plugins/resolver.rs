//! Dependency resolution.
//!
//! Computes the transitive closure of the requested plugins and orders it so
//! that every dependency comes before its dependents. Among plugins that do not
//! depend on each other, discovery order is kept.

use crate::error::{RegistryError, Result};
use crate::plugins::descriptor::{PluginDescriptor, PluginId};
use std::collections::HashSet;
use tracing::{debug, error};

/// Compute a load order for `requested`.
///
/// With a non-empty request, resolution is all-or-nothing: if any requested
/// plugin is missing, misses a dependency or sits on a dependency cycle, every
/// failure is logged and the first one is returned. Plugins in `already_loaded`
/// count as satisfied and never appear in the output.
///
/// With an empty request every available plugin is scheduled on a best-effort
/// basis; plugins whose closure cannot be satisfied are logged and left out.
///
/// # Errors
/// [`RegistryError::MissingPlugin`], [`RegistryError::MissingDependency`] or
/// [`RegistryError::DependencyCycle`]
pub fn resolve(
    requested: &[PluginId],
    available: &[&PluginDescriptor],
    already_loaded: &[PluginId],
) -> Result<Vec<PluginId>> {
    let mut resolver = Resolver {
        available,
        loaded: already_loaded.iter().copied().collect(),
        scheduled: HashSet::new(),
    };

    if requested.is_empty() {
        for descriptor in available {
            match resolver.closure(descriptor.identity()) {
                Ok(closure) => resolver.schedule(closure),
                Err(e) => error!("Skipping plugin '{}': {}", descriptor.name(), e),
            }
        }
    } else {
        let mut failure = None;
        for &identity in requested {
            match resolver.closure(identity) {
                Ok(closure) => resolver.schedule(closure),
                Err(e) => {
                    error!("Cannot load plugin {}: {}", identity, e);
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
    }

    resolver.order()
}

struct Resolver<'a> {
    available: &'a [&'a PluginDescriptor],
    loaded: HashSet<PluginId>,
    scheduled: HashSet<PluginId>,
}

impl<'a> Resolver<'a> {
    /// First candidate with this identity, in discovery order
    fn find(&self, identity: PluginId) -> Option<&'a PluginDescriptor> {
        self.available
            .iter()
            .copied()
            .find(|descriptor| descriptor.identity() == identity)
    }

    fn is_settled(&self, identity: PluginId) -> bool {
        self.loaded.contains(&identity) || self.scheduled.contains(&identity)
    }

    fn schedule(&mut self, closure: Vec<PluginId>) {
        self.scheduled.extend(closure);
    }

    /// Everything `root` needs that is neither loaded nor scheduled yet,
    /// dependencies first. Depth-first over an explicit stack; the stack doubles
    /// as the current path for cycle detection.
    fn closure(&self, root: PluginId) -> Result<Vec<PluginId>> {
        if self.is_settled(root) {
            return Ok(Vec::new());
        }
        let root = self.find(root).ok_or(RegistryError::MissingPlugin(root))?;

        let mut stack: Vec<(&PluginDescriptor, usize)> = vec![(root, 0)];
        let mut visited = HashSet::new();
        let mut closure = Vec::new();

        while let Some(&(descriptor, next)) = stack.last() {
            let Some(&dependency) = descriptor.dependencies().get(next) else {
                stack.pop();
                visited.insert(descriptor.identity());
                closure.push(descriptor.identity());
                continue;
            };

            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            if self.is_settled(dependency) || visited.contains(&dependency) {
                continue;
            }

            if let Some(start) = stack
                .iter()
                .position(|(on_path, _)| on_path.identity() == dependency)
            {
                let mut path: Vec<_> = stack[start..].iter().map(|(d, _)| d.identity()).collect();
                path.push(dependency);
                return Err(RegistryError::DependencyCycle { path });
            }

            let found = self
                .find(dependency)
                .ok_or(RegistryError::MissingDependency {
                    dependency,
                    required_by: descriptor.identity(),
                })?;
            stack.push((found, 0));
        }

        Ok(closure)
    }

    /// Order the scheduled plugins by repeatedly rotating the first plugin whose
    /// dependencies are all satisfied to the front of the remaining sequence.
    fn order(&self) -> Result<Vec<PluginId>> {
        let mut seen = HashSet::new();
        let mut pending: Vec<&PluginDescriptor> = self
            .available
            .iter()
            .copied()
            .filter(|d| self.scheduled.contains(&d.identity()) && seen.insert(d.identity()))
            .collect();

        let mut satisfied = self.loaded.clone();
        for i in 0..pending.len() {
            let ready = pending[i..].iter().position(|descriptor| {
                descriptor
                    .dependencies()
                    .iter()
                    .all(|dependency| satisfied.contains(dependency))
            });
            let Some(offset) = ready else {
                // closure() rejects cycles, so only reachable through a bug
                return Err(RegistryError::DependencyCycle {
                    path: pending[i..].iter().map(|d| d.identity()).collect(),
                });
            };
            pending[i..=i + offset].rotate_right(1);
            satisfied.insert(pending[i].identity());
        }

        let order: Vec<_> = pending.iter().map(|d| d.identity()).collect();
        debug!("Resolved load order: {:?}", order);
        Ok(order)
    }
}
