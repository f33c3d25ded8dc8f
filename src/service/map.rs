use crate::error::{Error, Result, code};
use crate::json::FlatJson;
use crate::service::{BoxedService, ServiceKind, ServiceKindId};
use ahash::AHashMap;

/// Owns a runner's services in dependency order.
///
/// Slots are emptied while a service executes a hook, which is what lets a
/// hook borrow any *other* collocated service without locks, and makes
/// re-entrant self-invocation impossible by construction.
pub struct ServiceMap {
    slots: Vec<Option<BoxedService>>,
    kinds: Vec<ServiceKind>,
    index: AHashMap<ServiceKindId, usize>,
    /// Services whose `on_create` has succeeded; destroy walks this prefix
    /// in reverse.
    created: usize,
}

impl ServiceMap {
    /// Solve the dependency order and build the map.
    ///
    /// Fails before any `on_create` runs if two services share a kind id, a
    /// declared dependency is absent, or the dependency graph has a cycle.
    /// Ties are broken by insertion order (Kahn's algorithm).
    pub fn build(services: Vec<BoxedService>) -> Result<Self> {
        let mut index = AHashMap::with_capacity(services.len());
        for (i, service) in services.iter().enumerate() {
            let kind = service.kind();
            if index.insert(kind.id, i).is_some() {
                return Err(Error::with_details(
                    code::FAILED,
                    FlatJson::new()
                        .set("message", "duplicate service kind id")
                        .set("kind_id", kind.id)
                        .set("kind_name", kind.name),
                ));
            }
        }

        for service in &services {
            for dep in service.dependencies() {
                if !index.contains_key(dep) {
                    return Err(Error::with_details(
                        code::MISSING_DEPENDENCY,
                        FlatJson::new()
                            .set("service", service.kind().name)
                            .set("dependency_id", *dep),
                    ));
                }
            }
        }

        let order = solve_order(&services, &index)?;

        let mut slots: Vec<Option<BoxedService>> = Vec::with_capacity(services.len());
        let mut kinds = Vec::with_capacity(services.len());
        let mut by_insertion: Vec<Option<BoxedService>> =
            services.into_iter().map(Some).collect();
        for &i in &order {
            let service = by_insertion[i].take().expect("topological order repeats a node");
            kinds.push(service.kind());
            slots.push(Some(service));
        }

        let index = kinds
            .iter()
            .enumerate()
            .map(|(slot, kind)| (kind.id, slot))
            .collect();

        Ok(Self {
            slots,
            kinds,
            index,
            created: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: ServiceKindId) -> bool {
        self.index.contains_key(&id)
    }

    /// Kinds in creation (topological) order.
    pub fn kinds(&self) -> &[ServiceKind] {
        &self.kinds
    }

    pub(crate) fn slot_of(&self, id: ServiceKindId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub(crate) fn kind_at(&self, slot: usize) -> ServiceKind {
        self.kinds[slot]
    }

    /// Remove a service from its slot for the duration of a hook call.
    /// Returns `None` if the slot is currently empty (service executing).
    pub(crate) fn take(&mut self, slot: usize) -> Option<BoxedService> {
        self.slots[slot].take()
    }

    pub(crate) fn put_back(&mut self, slot: usize, service: BoxedService) {
        debug_assert!(self.slots[slot].is_none());
        self.slots[slot] = Some(service);
    }

    pub(crate) fn created(&self) -> usize {
        self.created
    }

    pub(crate) fn set_created(&mut self, n: usize) {
        self.created = n;
    }
}

/// Kahn's algorithm over "service depends on kind id" edges; among ready
/// nodes the earliest-inserted wins.
fn solve_order(
    services: &[BoxedService],
    index: &AHashMap<ServiceKindId, usize>,
) -> Result<Vec<usize>> {
    let n = services.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, service) in services.iter().enumerate() {
        for dep in service.dependencies() {
            let d = index[dep];
            indegree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();

    while !ready.is_empty() {
        // smallest insertion index first
        let pos = ready
            .iter()
            .enumerate()
            .min_by_key(|&(_, &i)| i)
            .map(|(pos, _)| pos)
            .expect("ready set is non-empty");
        let next = ready.swap_remove(pos);
        order.push(next);

        for &dep in &dependents[next] {
            indegree[dep] -= 1;
            if indegree[dep] == 0 {
                ready.push(dep);
            }
        }
    }

    if order.len() != n {
        let stuck: Vec<&str> = (0..n)
            .filter(|&i| indegree[i] > 0)
            .map(|i| services[i].kind().name)
            .collect();
        return Err(Error::with_details(
            code::DEPENDENCY_CYCLE,
            FlatJson::new().set("services", stuck.join(", ")),
        ));
    }

    Ok(order)
}
