use super::graph::DependencyGraph;
use crate::config::stack::{ProfileDefinition, ServiceDescriptor, StackConfig, Tier, Variant};
use crate::error::StructuralError;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedService {
    pub descriptor: ServiceDescriptor,
    pub variant: Variant,
    /// Topological level inside the service's tier.
    pub wave: usize,
    /// Listed by the profile itself rather than pulled in as a dependency.
    pub explicit: bool,
}

impl PlannedService {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn tier(&self) -> Tier {
        self.descriptor.tier
    }
}

/// Ordered startup plan for one profile.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPlan {
    pub profile: String,
    pub variant: Variant,
    pub services: Vec<PlannedService>,
}

impl ResolvedPlan {
    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(PlannedService::name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&PlannedService> {
        self.services.iter().find(|service| service.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn tier(&self, tier: Tier) -> impl Iterator<Item = &PlannedService> + '_ {
        self.services
            .iter()
            .filter(move |service| service.tier() == tier)
    }

    /// The tier's services grouped by wave, in plan order within each wave.
    pub fn waves(&self, tier: Tier) -> Vec<Vec<&PlannedService>> {
        let mut grouped: BTreeMap<usize, Vec<&PlannedService>> = BTreeMap::new();
        for service in self.tier(tier) {
            grouped.entry(service.wave).or_default().push(service);
        }
        grouped.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct ProfileResolver {
    graph: DependencyGraph,
    profiles: Vec<ProfileDefinition>,
}

impl ProfileResolver {
    pub fn new(stack: &StackConfig) -> Self {
        Self {
            graph: DependencyGraph::build(stack),
            profiles: stack.profiles.clone(),
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn profile_names(&self) -> Vec<&str> {
        self.profiles
            .iter()
            .map(|profile| profile.name.as_str())
            .collect()
    }

    pub fn profiles(&self) -> &[ProfileDefinition] {
        &self.profiles
    }

    /// Effective service set of a profile in startup order.
    pub fn resolve(&self, profile: &str) -> Result<Vec<ServiceDescriptor>, StructuralError> {
        Ok(self
            .plan(profile, Variant::Release)?
            .services
            .into_iter()
            .map(|planned| planned.descriptor)
            .collect())
    }

    pub fn plan(&self, profile: &str, variant: Variant) -> Result<ResolvedPlan, StructuralError> {
        let listed = self.listed_services(profile)?;
        let requester = format!("profile:{profile}");
        let members = self.graph.closure(
            listed
                .iter()
                .map(|name| (requester.as_str(), name.as_str())),
        )?;
        let ordered = self.graph.order(&members)?;
        let waves = self.graph.waves(&ordered);
        let services = ordered
            .into_iter()
            .map(|ordinal| {
                let descriptor = self.graph.services()[ordinal].clone();
                PlannedService {
                    explicit: listed.contains(&descriptor.name),
                    descriptor,
                    variant,
                    wave: waves.get(&ordinal).copied().unwrap_or(0),
                }
            })
            .collect();

        Ok(ResolvedPlan {
            profile: profile.to_string(),
            variant,
            services,
        })
    }

    /// Services named by the profile and its `extends` chain, base profile first.
    fn listed_services(&self, profile: &str) -> Result<BTreeSet<String>, StructuralError> {
        let mut chain: Vec<&ProfileDefinition> = Vec::new();
        let mut current = Some(profile.to_string());

        while let Some(name) = current {
            let definition = self
                .find(&name)
                .ok_or_else(|| StructuralError::UnknownProfile {
                    profile: name.clone(),
                })?;

            if let Some(position) = chain.iter().position(|seen| seen.name == definition.name) {
                let services = chain[position..]
                    .iter()
                    .map(|seen| seen.name.clone())
                    .collect();
                return Err(StructuralError::CyclicDependency { services });
            }

            chain.push(definition);
            current = definition.extends.clone();
        }

        Ok(chain
            .iter()
            .rev()
            .flat_map(|definition| definition.services.iter().cloned())
            .collect())
    }

    fn find(&self, name: &str) -> Option<&ProfileDefinition> {
        self.profiles.iter().find(|profile| profile.name == name)
    }
}
