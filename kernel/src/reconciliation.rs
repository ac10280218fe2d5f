//! The compatibility matrix for changing the list layout between two writes of one table.
//!
//! A [`WriteScenario`] is an initial write under one layout followed by an upsert under another,
//! both with the same nullability. [`WriteScenario::is_representable`] decides whether the
//! scenario can be built at all and [`WriteScenario::reconcile`] what happens to the data.
//! `reconcile` refuses scenarios that `is_representable` filters out.
//!
//! The outcomes describe the table's merge path in its default [`MergeReadMode::WriterLayout`]:
//! the base file being rewritten is read back through the physical list path of the *current*
//! writer layout. When that path does not exist in the base file the list column of every
//! untouched row comes back null. With a nullable list that null is written out silently; with a
//! required list the writer refuses the row. Under [`MergeReadMode::Normalized`] the base file is
//! read through the cross-layout normalizer instead and every representable scenario is
//! compatible. If the merge path changes, these rules have to change with it.
use std::fmt;

use itertools::iproduct;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::layout::ListPhysicalLayout;
use crate::schema::Nullability;
use crate::utils::require;
use crate::{Error, LayoutResult};

/// What a layout change across two writes does to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ReconciliationOutcome {
    /// Every row reads back as written.
    Compatible,
    /// The second write succeeds, but rows it did not touch lose their list values.
    SilentDataLoss,
    /// The second write fails and leaves the table unchanged.
    WriteFailure,
}

/// How the merge path reads the base file of a file group it rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum MergeReadMode {
    /// Resolve list columns by the physical path the current writer layout produces.
    #[default]
    WriterLayout,
    /// Read through the cross-layout normalizer, whatever layout the base file uses.
    Normalized,
}

/// Two sequential writes to one table that share a nullability configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteScenario {
    pub initial_layout: ListPhysicalLayout,
    pub list_nullability: Nullability,
    pub target_layout: ListPhysicalLayout,
    pub element_nullability: Nullability,
}

impl fmt::Display for WriteScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} (list {}, elements {})",
            self.initial_layout, self.target_layout, self.list_nullability, self.element_nullability
        )
    }
}

impl WriteScenario {
    pub fn new(
        initial_layout: ListPhysicalLayout,
        list_nullability: Nullability,
        target_layout: ListPhysicalLayout,
        element_nullability: Nullability,
    ) -> Self {
        Self {
            initial_layout,
            list_nullability,
            target_layout,
            element_nullability,
        }
    }

    /// Every combination of layouts and nullabilities, representable or not.
    pub fn all() -> impl Iterator<Item = Self> {
        iproduct!(
            ListPhysicalLayout::iter(),
            Nullability::iter(),
            ListPhysicalLayout::iter(),
            Nullability::iter()
        )
        .map(|(initial, list, target, element)| Self::new(initial, list, target, element))
    }

    /// The scenarios that can actually be written.
    pub fn representable() -> impl Iterator<Item = Self> {
        Self::all().filter(Self::is_representable)
    }

    pub fn is_layout_change(&self) -> bool {
        self.initial_layout != self.target_layout
    }

    /// A two-level list on either side cannot hold null elements.
    pub fn is_representable(&self) -> bool {
        !self.element_nullability.is_nullable()
            || (self.initial_layout.supports_null_elements()
                && self.target_layout.supports_null_elements())
    }

    /// The outcome under the default merge read mode.
    pub fn reconcile(&self) -> LayoutResult<ReconciliationOutcome> {
        self.reconcile_with(MergeReadMode::default())
    }

    /// The outcome when the table merges with `mode`. Unrepresentable scenarios are an error.
    pub fn reconcile_with(&self, mode: MergeReadMode) -> LayoutResult<ReconciliationOutcome> {
        require!(
            self.is_representable(),
            Error::UnrepresentableScenario(self.to_string())
        );
        let outcome = match (mode, self.is_layout_change(), self.list_nullability) {
            (MergeReadMode::Normalized, _, _) | (_, false, _) => ReconciliationOutcome::Compatible,
            (MergeReadMode::WriterLayout, true, Nullability::Nullable) => {
                ReconciliationOutcome::SilentDataLoss
            }
            (MergeReadMode::WriterLayout, true, Nullability::NotNullable) => {
                ReconciliationOutcome::WriteFailure
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rstest::rstest;

    use super::*;
    use crate::layout::ListPhysicalLayout::{ThreeLevel, TwoLevel};
    use crate::schema::Nullability::{NotNullable, Nullable};

    #[test]
    fn enumerates_full_cross_product() {
        let all: HashSet<_> = WriteScenario::all().collect();
        assert_eq!(all.len(), 16);
        assert_eq!(WriteScenario::representable().count(), 10);
    }

    #[test]
    fn unrepresentable_scenarios_have_two_level_and_null_elements() {
        for scenario in WriteScenario::all().filter(|s| !s.is_representable()) {
            assert_eq!(scenario.element_nullability, Nullable);
            assert!(scenario.initial_layout == TwoLevel || scenario.target_layout == TwoLevel);
            let err = scenario.reconcile().unwrap_err();
            assert!(
                matches!(err, Error::UnrepresentableScenario(_)),
                "unexpected error {err}"
            );
        }
    }

    #[rstest]
    #[case(TwoLevel, Nullable, TwoLevel, NotNullable, ReconciliationOutcome::Compatible)]
    #[case(TwoLevel, NotNullable, TwoLevel, NotNullable, ReconciliationOutcome::Compatible)]
    #[case(ThreeLevel, Nullable, ThreeLevel, NotNullable, ReconciliationOutcome::Compatible)]
    #[case(ThreeLevel, NotNullable, ThreeLevel, NotNullable, ReconciliationOutcome::Compatible)]
    #[case(ThreeLevel, Nullable, ThreeLevel, Nullable, ReconciliationOutcome::Compatible)]
    #[case(ThreeLevel, NotNullable, ThreeLevel, Nullable, ReconciliationOutcome::Compatible)]
    #[case(TwoLevel, Nullable, ThreeLevel, NotNullable, ReconciliationOutcome::SilentDataLoss)]
    #[case(ThreeLevel, Nullable, TwoLevel, NotNullable, ReconciliationOutcome::SilentDataLoss)]
    #[case(TwoLevel, NotNullable, ThreeLevel, NotNullable, ReconciliationOutcome::WriteFailure)]
    #[case(ThreeLevel, NotNullable, TwoLevel, NotNullable, ReconciliationOutcome::WriteFailure)]
    fn compatibility_matrix(
        #[case] initial: ListPhysicalLayout,
        #[case] list: Nullability,
        #[case] target: ListPhysicalLayout,
        #[case] element: Nullability,
        #[case] expected: ReconciliationOutcome,
    ) {
        let scenario = WriteScenario::new(initial, list, target, element);
        assert!(scenario.is_representable());
        assert_eq!(scenario.reconcile().unwrap(), expected);
        // repeated evaluation never changes the answer
        assert_eq!(scenario.reconcile().unwrap(), expected);
        assert_eq!(
            scenario.reconcile_with(MergeReadMode::Normalized).unwrap(),
            ReconciliationOutcome::Compatible
        );
    }

    #[test]
    fn four_incompatible_scenarios() {
        let incompatible = WriteScenario::representable()
            .filter(|s| s.reconcile().unwrap() != ReconciliationOutcome::Compatible)
            .count();
        assert_eq!(incompatible, 4);
    }

    #[test]
    fn merge_read_mode_parses() {
        assert_eq!(
            "normalized".parse::<MergeReadMode>().unwrap(),
            MergeReadMode::Normalized
        );
        assert_eq!(MergeReadMode::default().to_string(), "writer-layout");
    }
}
