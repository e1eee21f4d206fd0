use crate::config::stack::{ServiceDescriptor, StackConfig, Tier};
use crate::error::StructuralError;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Declared services indexed by name, keeping declaration order as the tie-break ordinal.
#[derive(Clone, Debug)]
pub struct DependencyGraph {
    services: Vec<ServiceDescriptor>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    pub fn build(stack: &StackConfig) -> Self {
        Self::from_services(stack.services.clone())
    }

    pub fn from_services(services: Vec<ServiceDescriptor>) -> Self {
        let index = services
            .iter()
            .enumerate()
            .map(|(ordinal, service)| (service.name.clone(), ordinal))
            .collect();
        Self { services, index }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.ordinal(name).map(|ordinal| &self.services[ordinal])
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Transitive `depends_on` closure of the requested services.
    ///
    /// Each request is a `(requester, service)` pair; the requester names whoever asked for the
    /// service (a profile, usually) so an undeclared name can be reported against it.
    pub fn closure<'a, I>(&self, requests: I) -> Result<BTreeSet<usize>, StructuralError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut members = BTreeSet::new();
        let mut pending = Vec::new();

        for (requester, name) in requests {
            let ordinal = self
                .ordinal(name)
                .ok_or_else(|| StructuralError::MissingDependency {
                    service: requester.to_string(),
                    dependency: name.to_string(),
                })?;
            pending.push(ordinal);
        }

        while let Some(ordinal) = pending.pop() {
            if !members.insert(ordinal) {
                continue;
            }
            let service = &self.services[ordinal];
            for dependency in &service.depends_on {
                let dep_ordinal =
                    self.ordinal(dependency)
                        .ok_or_else(|| StructuralError::MissingDependency {
                            service: service.name.clone(),
                            dependency: dependency.clone(),
                        })?;
                if !members.contains(&dep_ordinal) {
                    pending.push(dep_ordinal);
                }
            }
        }

        Ok(members)
    }

    /// Orders a dependency-closed member set: dependencies first, infrastructure before
    /// applications, declaration order among otherwise unordered services.
    pub fn order(&self, members: &BTreeSet<usize>) -> Result<Vec<usize>, StructuralError> {
        let mut remaining_deps: BTreeMap<usize, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

        for &ordinal in members {
            let deps = self.member_dependencies(ordinal, members);
            remaining_deps.insert(ordinal, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(ordinal);
            }
        }

        let mut ready: BTreeSet<(Tier, usize)> = remaining_deps
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(&ordinal, _)| (self.services[ordinal].tier, ordinal))
            .collect();
        let mut ordered = Vec::with_capacity(members.len());

        while let Some(next) = ready.pop_first() {
            let (_, ordinal) = next;
            ordered.push(ordinal);
            for &dependent in dependents.get(&ordinal).into_iter().flatten() {
                if let Some(count) = remaining_deps.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert((self.services[dependent].tier, dependent));
                    }
                }
            }
        }

        if ordered.len() == members.len() {
            return Ok(ordered);
        }

        let placed: BTreeSet<usize> = ordered.into_iter().collect();
        let stuck: BTreeSet<usize> = members.difference(&placed).copied().collect();
        Err(StructuralError::CyclicDependency {
            services: self.names(&self.cycle_core(stuck)),
        })
    }

    /// Topological level of each member inside its own tier. Services on the same level of the
    /// same tier have no dependency between them and can be dispatched together.
    pub fn waves(&self, ordered: &[usize]) -> BTreeMap<usize, usize> {
        let mut levels: BTreeMap<usize, usize> = BTreeMap::new();
        for &ordinal in ordered {
            let service = &self.services[ordinal];
            let level = service
                .depends_on
                .iter()
                .filter_map(|dep| self.ordinal(dep))
                .filter(|dep| self.services[*dep].tier == service.tier)
                .filter_map(|dep| levels.get(&dep))
                .map(|level| level + 1)
                .max()
                .unwrap_or(0);
            levels.insert(ordinal, level);
        }
        levels
    }

    /// The whole declaration in startup order.
    pub fn full_order(&self) -> Result<Vec<usize>, StructuralError> {
        let requests: Vec<(&str, &str)> = self
            .services
            .iter()
            .map(|service| (service.name.as_str(), service.name.as_str()))
            .collect();
        let members = self.closure(requests)?;
        self.order(&members)
    }

    pub fn names(&self, ordinals: &BTreeSet<usize>) -> Vec<String> {
        ordinals
            .iter()
            .map(|&ordinal| self.services[ordinal].name.clone())
            .collect()
    }

    fn member_dependencies(&self, ordinal: usize, members: &BTreeSet<usize>) -> BTreeSet<usize> {
        self.services[ordinal]
            .depends_on
            .iter()
            .filter_map(|dep| self.ordinal(dep))
            .filter(|dep| members.contains(dep))
            .collect()
    }

    /// Drops services that merely hang off a cycle, leaving the ones that take part in it.
    fn cycle_core(&self, mut stuck: BTreeSet<usize>) -> BTreeSet<usize> {
        loop {
            let leaves: Vec<usize> = stuck
                .iter()
                .copied()
                .filter(|&candidate| {
                    !stuck.iter().any(|&other| {
                        other != candidate
                            && self.member_dependencies(other, &stuck).contains(&candidate)
                    }) && !self.member_dependencies(candidate, &stuck).contains(&candidate)
                })
                .collect();
            if leaves.is_empty() {
                return stuck;
            }
            for leaf in leaves {
                stuck.remove(&leaf);
            }
        }
    }
}
