//! Constraint pushdown for generator tables.
//!
//! Every parameter column must be bound by `=` if it is constrained at all.
//! Bound parameters are handed to `filter` in parameter order, which is
//! also the order the generator receives them in.

use gentab_error::{GentabError, Result};
use gentab_types::SqliteValue;
use tracing::debug;

use crate::protocol::{ConstraintOp, IndexConstraint, IndexInfo};

/// Width of the `idx_num` bitmask.
pub const MAX_PARAMETERS: usize = 32;

const BASE_COST: i64 = 1_000_000_000;

/// A parameter the plan binds from a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundParameter {
    pub parameter: usize,
    /// Index of the constraint in the planner's list.
    pub constraint: usize,
    /// 1-based position in the `filter` argument list.
    pub argv_index: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Sorted by `parameter`, one entry per bound parameter.
    pub bound: Vec<BoundParameter>,
    /// Bit `i` is set iff parameter `i` is bound.
    pub mask: u32,
    pub estimated_cost: f64,
    pub estimated_rows: i64,
}

impl Plan {
    pub fn is_bound(&self, parameter: usize) -> bool {
        parameter < MAX_PARAMETERS && self.mask & (1 << parameter) != 0
    }

    /// Write the plan into the planner's index info.
    #[allow(clippy::cast_possible_wrap)]
    pub fn apply(&self, info: &mut IndexInfo) {
        for bound in &self.bound {
            let usage = &mut info.constraint_usage[bound.constraint];
            usage.argv_index = bound.argv_index;
            usage.omit = true;
        }
        info.idx_num = self.mask as i32;
        info.estimated_cost = self.estimated_cost;
        info.estimated_rows = self.estimated_rows;
    }
}

/// Choose which constraints feed the generator.
///
/// `LIMIT`/`OFFSET` and constraints on data columns are left to the engine.
/// A parameter column constrained by anything but `=` fails with
/// [`GentabError::PlanningViolation`]; an unusable `=` rejects the whole plan
/// with [`GentabError::UnusablePlanConstraint`].
#[allow(clippy::cast_precision_loss)]
pub fn plan(parameter_names: &[String], constraints: &[IndexConstraint]) -> Result<Plan> {
    let mut forwarded = Vec::new();
    for (index, constraint) in constraints.iter().enumerate() {
        if constraint.op.is_pseudo() {
            continue;
        }
        let Ok(parameter) = usize::try_from(constraint.column) else {
            continue;
        };
        let Some(name) = parameter_names.get(parameter) else {
            continue;
        };
        if constraint.op != ConstraintOp::Eq {
            return Err(GentabError::PlanningViolation {
                parameter: name.clone(),
            });
        }
        if !constraint.usable {
            debug!(target: "gentab.vtab", parameter = %name, "rejecting plan with unusable constraint");
            return Err(GentabError::UnusablePlanConstraint);
        }
        forwarded.push((parameter, index));
    }
    forwarded.sort_unstable();

    let mut mask = 0_u32;
    let mut bound = Vec::with_capacity(forwarded.len());
    for (parameter, constraint) in forwarded {
        if parameter >= MAX_PARAMETERS {
            return Err(GentabError::internal(format!(
                "parameter index {parameter} exceeds the plan bitmask"
            )));
        }
        let bit = 1_u32 << parameter;
        if mask & bit != 0 {
            continue;
        }
        mask |= bit;
        let argv_index = i32::try_from(bound.len() + 1)
            .map_err(|_| GentabError::internal("argument position overflow"))?;
        bound.push(BoundParameter {
            parameter,
            constraint,
            argv_index,
        });
    }

    let divisor = i64::try_from(bound.len()).unwrap_or(i64::MAX - 1) + 1;
    let estimate = BASE_COST / divisor;
    debug!(target: "gentab.vtab", mask, bound = bound.len(), estimate, "planned generator scan");
    Ok(Plan {
        bound,
        mask,
        estimated_cost: estimate as f64,
        estimated_rows: estimate,
    })
}

/// Rebuild the positional parameter list from a plan's mask and the
/// engine-supplied `filter` arguments. Unbound parameters are `None`.
pub fn unpack_arguments<'a>(
    mask: u32,
    parameter_count: usize,
    argv: &'a [SqliteValue],
) -> Result<Vec<Option<&'a SqliteValue>>> {
    let mut next = argv.iter();
    let mut args = Vec::with_capacity(parameter_count);
    for parameter in 0..parameter_count.min(MAX_PARAMETERS) {
        if mask & (1 << parameter) == 0 {
            args.push(None);
            continue;
        }
        let value = next.next().ok_or_else(|| {
            GentabError::internal(format!(
                "filter received {} arguments for plan mask {mask:#x}",
                argv.len()
            ))
        })?;
        args.push(Some(value));
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("p{i}")).collect()
    }

    fn eq(column: i32) -> IndexConstraint {
        IndexConstraint {
            column,
            op: ConstraintOp::Eq,
            usable: true,
        }
    }

    #[test]
    fn binds_in_parameter_order() {
        // The planner offers p2 before p0; argv positions follow parameter order.
        let constraints = vec![eq(2), eq(0)];
        let plan = plan(&names(3), &constraints).unwrap();
        assert_eq!(plan.mask, 0b101);
        assert_eq!(
            plan.bound,
            vec![
                BoundParameter {
                    parameter: 0,
                    constraint: 1,
                    argv_index: 1
                },
                BoundParameter {
                    parameter: 2,
                    constraint: 0,
                    argv_index: 2
                },
            ]
        );
        assert!(plan.is_bound(0));
        assert!(!plan.is_bound(1));
    }

    #[test]
    fn duplicate_constraints_bind_once() {
        let plan = plan(&names(1), &[eq(0), eq(0)]).unwrap();
        assert_eq!(plan.bound.len(), 1);
        assert_eq!(plan.bound[0].constraint, 0);

        let mut info = IndexInfo::new(vec![eq(0), eq(0)]);
        plan.apply(&mut info);
        assert_eq!(info.constraint_usage[0].argv_index, 1);
        assert!(info.constraint_usage[0].omit);
        assert_eq!(info.constraint_usage[1].argv_index, 0);
        assert!(!info.constraint_usage[1].omit);
    }

    #[test]
    fn data_columns_and_pseudo_constraints_are_ignored() {
        let constraints = vec![
            IndexConstraint {
                column: 1,
                op: ConstraintOp::Gt,
                usable: true,
            },
            IndexConstraint {
                column: 0,
                op: ConstraintOp::Limit,
                usable: true,
            },
            IndexConstraint {
                column: -1,
                op: ConstraintOp::Eq,
                usable: true,
            },
        ];
        let plan = plan(&names(1), &constraints).unwrap();
        assert_eq!(plan.mask, 0);
        assert!(plan.bound.is_empty());
    }

    #[test]
    fn non_equality_on_parameter_fails() {
        let constraints = vec![IndexConstraint {
            column: 0,
            op: ConstraintOp::Ge,
            usable: true,
        }];
        let err = plan(&["id".to_owned()], &constraints).unwrap_err();
        assert!(matches!(
            err,
            GentabError::PlanningViolation { ref parameter } if parameter == "id"
        ));
    }

    #[test]
    fn unusable_equality_rejects_plan() {
        let constraints = vec![IndexConstraint {
            column: 0,
            op: ConstraintOp::Eq,
            usable: false,
        }];
        assert!(matches!(
            plan(&names(1), &constraints),
            Err(GentabError::UnusablePlanConstraint)
        ));
    }

    #[test]
    fn cost_falls_with_bound_parameters() {
        let none = plan(&names(2), &[]).unwrap();
        let one = plan(&names(2), &[eq(0)]).unwrap();
        let two = plan(&names(2), &[eq(0), eq(1)]).unwrap();
        assert_eq!(none.estimated_rows, 1_000_000_000);
        assert_eq!(one.estimated_rows, 500_000_000);
        assert_eq!(two.estimated_rows, 333_333_333);
        assert!(none.estimated_cost > one.estimated_cost);
        assert!(one.estimated_cost > two.estimated_cost);

        let mut info = IndexInfo::new(vec![eq(0)]);
        one.apply(&mut info);
        assert_eq!(info.idx_num, 1);
        assert!((info.estimated_cost - 500_000_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unpack_places_arguments_by_mask() {
        let argv = vec![SqliteValue::Integer(10), SqliteValue::Integer(30)];
        let args = unpack_arguments(0b101, 3, &argv).unwrap();
        assert_eq!(args, vec![Some(&argv[0]), None, Some(&argv[1])]);
    }

    #[test]
    fn unpack_rejects_short_argv() {
        let argv = vec![SqliteValue::Integer(10)];
        assert!(unpack_arguments(0b11, 2, &argv).is_err());
    }

    proptest! {
        #[test]
        fn generator_sees_declaration_order(
            count in 1_usize..8,
            picks in proptest::collection::vec(0_usize..8, 0..12),
        ) {
            let parameter_names = names(count);
            let picks: Vec<usize> = picks.into_iter().filter(|p| *p < count).collect();
            let constraints: Vec<IndexConstraint> = picks
                .iter()
                .map(|p| eq(i32::try_from(*p).unwrap()))
                .collect();
            let plan = plan(&parameter_names, &constraints).unwrap();

            let mut expected: Vec<usize> = picks.clone();
            expected.sort_unstable();
            expected.dedup();
            let bound: Vec<usize> = plan.bound.iter().map(|b| b.parameter).collect();
            prop_assert_eq!(&bound, &expected);

            // Simulate the engine: argv[k] = value of the constraint assigned k+1.
            let mut info = IndexInfo::new(constraints.clone());
            plan.apply(&mut info);
            let mut argv = vec![SqliteValue::Null; plan.bound.len()];
            for (i, usage) in info.constraint_usage.iter().enumerate() {
                if usage.argv_index > 0 {
                    let slot = usize::try_from(usage.argv_index - 1).unwrap();
                    argv[slot] = SqliteValue::Integer(i64::from(constraints[i].column) * 100);
                }
            }
            #[allow(clippy::cast_sign_loss)]
            let args = unpack_arguments(info.idx_num as u32, count, &argv).unwrap();
            prop_assert_eq!(args.len(), count);
            for (parameter, arg) in args.iter().enumerate() {
                if expected.contains(&parameter) {
                    let want = SqliteValue::Integer(i64::try_from(parameter).unwrap() * 100);
                    prop_assert_eq!(*arg, Some(&want));
                } else {
                    prop_assert_eq!(*arg, None);
                }
            }
        }
    }
}
