use std::collections::BTreeSet;

use proptest::prelude::*;
use rolld::orchestrator::compute_diff;
use rolld::types::{AppDescriptor, AppId};
use semver::Version;

fn arb_descriptor() -> impl Strategy<Value = AppDescriptor> {
    ("[a-e]", 0u64..3, 0u64..3).prop_map(|(id, major, minor)| {
        AppDescriptor::new(id.as_str(), Version::new(major, minor, 0), format!("bin/{id}"))
    })
}

/// Deployed sets never hold an id twice.
fn arb_deployed() -> impl Strategy<Value = Vec<AppDescriptor>> {
    prop::collection::vec(arb_descriptor(), 0..6).prop_map(|mut v| {
        let mut seen = BTreeSet::new();
        v.retain(|d| seen.insert(d.app_id.clone()));
        v
    })
}

proptest! {
    #[test]
    fn every_id_lands_in_exactly_one_bucket(
        desired in prop::collection::vec(arb_descriptor(), 0..8),
        deployed in arb_deployed(),
    ) {
        let diff = compute_diff(&desired, &deployed);

        let mut seen: Vec<AppId> = Vec::new();
        seen.extend(diff.unchanged.iter().map(|d| d.app_id.clone()));
        seen.extend(diff.install.iter().map(|d| d.app_id.clone()));
        seen.extend(diff.upgrade.iter().map(|u| u.to.app_id.clone()));
        seen.extend(diff.remove.iter().map(|d| d.app_id.clone()));

        let unique: BTreeSet<AppId> = seen.iter().cloned().collect();
        prop_assert_eq!(unique.len(), seen.len());

        let expected: BTreeSet<AppId> = desired
            .iter()
            .chain(deployed.iter())
            .map(|d| d.app_id.clone())
            .collect();
        prop_assert_eq!(unique, expected);
    }

    #[test]
    fn applying_the_diff_reaches_the_desired_versions(
        desired in prop::collection::vec(arb_descriptor(), 0..8),
        deployed in arb_deployed(),
    ) {
        let diff = compute_diff(&desired, &deployed);

        let mut after: Vec<AppDescriptor> = diff.unchanged.clone();
        after.extend(diff.upgrade.iter().map(|u| u.to.clone()));
        after.extend(diff.install.iter().cloned());

        prop_assert!(compute_diff(&desired, &after).is_empty());
        for upgrade in &diff.upgrade {
            prop_assert_ne!(&upgrade.from.version, &upgrade.to.version);
            let top = desired
                .iter()
                .filter(|d| d.app_id == upgrade.to.app_id)
                .map(|d| &d.version)
                .max();
            prop_assert_eq!(Some(&upgrade.to.version), top);
        }
    }
}
