use tracing::{debug, error, info, warn};

use crate::cloud::{DirectoryError, GroupDirectory};

/// Discovered sandbox topology.
///
/// `instance_ids` is group-major: with `n` instances per group, the
/// instance in slot `s` of group `g` sits at `g * n + s`. Unfilled slots stay empty
/// strings. Built once at startup and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimensionSet {
    pub group_names: Vec<String>,
    pub instance_ids: Vec<String>,
}

impl DimensionSet {
    /// An all-empty set sized for the expected topology.
    pub fn with_capacity(expected_groups: usize, instances_per_group: usize) -> Self {
        Self {
            group_names: vec![String::new(); expected_groups],
            instance_ids: vec![String::new(); expected_groups * instances_per_group],
        }
    }

    /// Groups that were actually found.
    pub fn found_groups(&self) -> usize {
        self.group_names.iter().filter(|n| !n.is_empty()).count()
    }

    /// Instances that were actually found.
    pub fn found_instances(&self) -> usize {
        self.instance_ids.iter().filter(|n| !n.is_empty()).count()
    }
}

/// Bounds for one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryParams {
    /// Substring a group name must contain.
    pub group_prefix: String,
    pub expected_groups: usize,
    pub instances_per_group: usize,
    /// Maximum listing pages read, whatever the continuation token says.
    pub page_cap: usize,
}

/// Pages through the group listing and fills a [`DimensionSet`].
///
/// Stops as soon as `expected_groups` matching groups were seen, when the
/// listing ends, or after `page_cap` pages. Missing groups or instances are
/// only warned about; any listing error aborts.
pub async fn discover<D: GroupDirectory>(
    directory: &D,
    params: &DiscoveryParams,
) -> Result<DimensionSet, DirectoryError> {
    let per_group = params.instances_per_group;
    let mut set = DimensionSet::with_capacity(params.expected_groups, per_group);
    let mut found = 0usize;
    let mut next_token: Option<String> = None;

    'pages: for page in 0..params.page_cap {
        let listing = directory.list_groups(next_token.take()).await?;

        debug!(page, groups = listing.groups.len(), "scanning group page");

        for group in listing.groups {
            if !group.name.contains(&params.group_prefix) {
                continue;
            }

            if group.instance_ids.len() > per_group {
                error!(
                    group = %group.name,
                    found = group.instance_ids.len(),
                    expected = per_group,
                    "too many instances in group, ignoring the excess",
                );
            }

            let base = found * per_group;
            for (slot, id) in group.instance_ids.into_iter().take(per_group).enumerate() {
                set.instance_ids[base + slot] = id;
            }
            set.group_names[found] = group.name;
            found += 1;

            if found >= params.expected_groups {
                break 'pages;
            }
        }

        match listing.next_token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    if set.found_groups() == 0 {
        warn!(prefix = %params.group_prefix, "no auto-scaling group found for the sandbox");
    }
    if set.found_instances() == 0 {
        warn!(prefix = %params.group_prefix, "no instances found for the sandbox");
    }

    info!(
        groups = set.found_groups(),
        instances = set.found_instances(),
        "infrastructure discovered",
    );

    Ok(set)
}
