// Copyright (c) 2025 knix
// All rights reserved.

//! Host pipeline surface: applies adapter conversion across the
//! callable-reference and argument sites collected for one compilation unit.

use anyhow::Result;
use log::info;

use crate::lower::types::TypeId;
use crate::lower::{LoweringUnit, TypedExprId};

/// A place the enclosing conversion pass decided may need adaptation.
#[derive(Debug, Clone, Copy)]
pub enum ConversionSite {
    CallableReference { reference: TypedExprId, expected_type: TypeId },
    SuspendArgument { argument: TypedExprId, expected_param_type: TypeId },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LowerStats {
    pub adapters_built: u32,
    pub sites_unchanged: u32,
}

/// Runs adapter lowering over `sites` in order, returning per-site result
/// expressions (the input expression wherever no adapter was needed).
/// Internal-consistency faults panic; lowering errors abort the unit.
pub fn run_adapter_lowering(
    unit: &mut LoweringUnit,
    sites: &[ConversionSite],
) -> Result<(LowerStats, Vec<TypedExprId>)> {
    let mut stats = LowerStats::default();
    let mut results = Vec::with_capacity(sites.len());
    for site in sites {
        let result = match site {
            ConversionSite::CallableReference { reference, expected_type } => {
                let target = unit.exprs.get(*reference).expect_callable_reference().target;
                if unit.needs_adapter(*reference, *expected_type, target) {
                    let adapted =
                        unit.synthesize_for_callable_reference(*reference, *expected_type)?;
                    stats.adapters_built += 1;
                    adapted
                } else {
                    stats.sites_unchanged += 1;
                    *reference
                }
            }
            ConversionSite::SuspendArgument { argument, expected_param_type } => {
                let adapted = unit.synthesize_for_argument(*argument, *expected_param_type)?;
                if adapted == *argument {
                    stats.sites_unchanged += 1;
                } else {
                    stats.adapters_built += 1;
                }
                adapted
            }
        };
        results.push(result);
    }
    info!(
        "adapter lowering: {} adapter(s) built, {} site(s) unchanged",
        stats.adapters_built, stats.sites_unchanged
    );
    Ok((stats, results))
}
