pub mod bearoff;
pub mod cache;
pub mod classify;
pub mod cube;
pub mod error;
pub mod eval;
pub mod inputs;
pub mod met;
pub mod neural;
pub mod rollout;
pub mod sanity;
pub mod weights;

pub use bearoff::{
    average_rolls, BearoffDb, BearoffDist, BearoffSet, BearoffType, EffectivePipCount,
    HEURISTIC_CHEQUERS, HEURISTIC_POINTS,
};
pub use cache::{CacheKey, EvalCache, CACHE_OUTPUTS, CACHE_SIZE_DEFAULT};
pub use classify::{classify, PositionClass};
pub use cube::{
    cash_points, eq2mwc, eval_efficiency, find_cube_decision, mwc2eq, se_eq2mwc, se_mwc2eq,
    utility, utility_me, CubeDecision, CubeInfo, NUM_CUBEFUL_OUTPUTS, OUTPUT_DROP,
    OUTPUT_NODOUBLE, OUTPUT_OPTIMAL, OUTPUT_TAKE,
};
pub use error::{EngineError, Result};
pub use eval::{
    invert_evaluation, invert_evaluation_r, EngineContext, EvalConfig, MoveFilter,
    MoveFilterTable, MAX_FILTER_PLIES, NORMAL_FILTERS,
};
pub use inputs::{NUM_INPUTS, NUM_PRUNING_INPUTS, NUM_RACE_INPUTS};
pub use met::{log_cube, MatchEquityTable, MetParams};
pub use neural::{NetScratch, NeuralNet};
pub use rollout::{
    general_cube_decision_rollout, general_evaluation_rollout, rollout_general, EvalSetup,
    RolloutConfig, RolloutStat, RolloutSummary,
};
pub use sanity::sanity_check;
pub use weights::Weights;
