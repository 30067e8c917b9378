use crate::mqtt::{AckReasonCode, DisconnectReasonCode, SubackReasonCode};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerdictError {
    /// A second decision on a sealed verdict, or a write from a party whose turn is over.
    #[error("authorization is already decided, {method} is not allowed")]
    AlreadyDecided { method: &'static str },
    #[error("reason code {0} cannot be used to fail an authorization")]
    InvalidReasonCode(String),
}

/// What an authorization is about; fixes the reason code type used on failure.
pub trait VerdictKind: Send + Sync + 'static {
    type FailCode: Copy + fmt::Debug + PartialEq + Send + Sync + 'static;

    const DEFAULT_FAIL_CODE: Self::FailCode;

    fn check_fail_code(code: Self::FailCode) -> Result<(), VerdictError>;
}

/// PUBLISH and Will authorization; failures carry a PUBACK code.
pub enum PublishAuthorization {}

/// Per-topic SUBSCRIBE authorization; failures carry a SUBACK code.
pub enum SubscribeAuthorization {}

impl VerdictKind for PublishAuthorization {
    type FailCode = AckReasonCode;

    const DEFAULT_FAIL_CODE: AckReasonCode = AckReasonCode::NotAuthorized;

    fn check_fail_code(code: AckReasonCode) -> Result<(), VerdictError> {
        if code.is_error() {
            Ok(())
        } else {
            Err(VerdictError::InvalidReasonCode(format!("{code:?}")))
        }
    }
}

impl VerdictKind for SubscribeAuthorization {
    type FailCode = SubackReasonCode;

    const DEFAULT_FAIL_CODE: SubackReasonCode = SubackReasonCode::NotAuthorized;

    fn check_fail_code(code: SubackReasonCode) -> Result<(), VerdictError> {
        if code.is_granted() {
            Err(VerdictError::InvalidReasonCode(format!("{code:?}")))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<F> {
    Undecided,
    Continue,
    Success,
    Fail {
        code: F,
        reason: Option<String>,
    },
    Disconnect {
        code: DisconnectReasonCode,
        reason: Option<String>,
    },
}

impl<F> Outcome<F> {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Outcome::Success | Outcome::Fail { .. } | Outcome::Disconnect { .. }
        )
    }
}

/// Protocol-independent admission decision derived from a resolved outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<F> {
    Allow,
    Reject {
        code: F,
        reason: Option<String>,
    },
    Disconnect {
        code: DisconnectReasonCode,
        reason: Option<String>,
    },
}

/// Apply the default policy: `Continue` allows, `Undecided` allows unless an
/// extension claimed the operation, in which case it is rejected.
pub fn decide<K: VerdictKind>(
    outcome: Outcome<K::FailCode>,
    extension_present: bool,
) -> Decision<K::FailCode> {
    match outcome {
        Outcome::Success | Outcome::Continue => Decision::Allow,
        Outcome::Undecided if extension_present => Decision::Reject {
            code: K::DEFAULT_FAIL_CODE,
            reason: None,
        },
        Outcome::Undecided => Decision::Allow,
        Outcome::Fail { code, reason } => Decision::Reject { code, reason },
        Outcome::Disconnect { code, reason } => Decision::Disconnect { code, reason },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Phase {
    /// The current party may write; nobody has continued yet.
    Open = 0,
    /// The current party may write; an earlier party continued.
    OpenContinued = 1,
    /// The current party continued and may not write again.
    Continued = 2,
    /// A terminal write is being published.
    Deciding = 3,
    Decided = 4,
}

impl Phase {
    fn from_bits(bits: u8) -> Phase {
        match bits {
            0 => Phase::Open,
            1 => Phase::OpenContinued,
            2 => Phase::Continued,
            3 => Phase::Deciding,
            _ => Phase::Decided,
        }
    }

    fn accepts_writes(self) -> bool {
        matches!(self, Phase::Open | Phase::OpenContinued)
    }

    fn is_sealed(self) -> bool {
        matches!(self, Phase::Deciding | Phase::Decided)
    }
}

const PHASE_BITS: u32 = 8;

fn pack(turn: u32, phase: Phase) -> u64 {
    (u64::from(turn) << PHASE_BITS) | phase as u64
}

fn unpack(raw: u64) -> (u32, Phase) {
    ((raw >> PHASE_BITS) as u32, Phase::from_bits(raw as u8))
}

/// Shared output for one authorization, written by one party at a time.
///
/// The whole state lives in one atomic word holding the active party's turn
/// and a phase. Every write is a compare-and-swap from "open at my turn", so
/// the first terminal write seals the verdict for everyone and writes from a
/// party whose turn has passed are rejected.
pub struct AuthorizationVerdict<K: VerdictKind> {
    state: AtomicU64,
    decision: OnceLock<Outcome<K::FailCode>>,
    extension_present: AtomicBool,
    _kind: PhantomData<K>,
}

pub type PublishVerdict = AuthorizationVerdict<PublishAuthorization>;
pub type SubscribeVerdict = AuthorizationVerdict<SubscribeAuthorization>;
pub type PublishVerdictHandle = VerdictHandle<PublishAuthorization>;
pub type SubscribeVerdictHandle = VerdictHandle<SubscribeAuthorization>;

impl<K: VerdictKind> Default for AuthorizationVerdict<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: VerdictKind> AuthorizationVerdict<K> {
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(pack(0, Phase::Open)),
            decision: OnceLock::new(),
            extension_present: AtomicBool::new(false),
            _kind: PhantomData,
        }
    }

    /// Output handle for the party at `turn`. Only the active turn can write.
    pub fn handle(self: &Arc<Self>, turn: u32) -> VerdictHandle<K> {
        VerdictHandle {
            verdict: self.clone(),
            turn,
        }
    }

    /// Record that an extension claimed this operation. Does not seal.
    pub fn mark_extension_present(&self) {
        self.extension_present.store(true, Ordering::SeqCst);
    }

    pub fn extension_present(&self) -> bool {
        self.extension_present.load(Ordering::SeqCst)
    }

    pub fn is_decided(&self) -> bool {
        unpack(self.state.load(Ordering::Acquire)).1.is_sealed()
    }

    pub fn current_turn(&self) -> u32 {
        unpack(self.state.load(Ordering::Acquire)).0
    }

    pub fn outcome(&self) -> Outcome<K::FailCode> {
        loop {
            let (_, phase) = unpack(self.state.load(Ordering::Acquire));
            match phase {
                Phase::Open => return Outcome::Undecided,
                Phase::OpenContinued | Phase::Continued => return Outcome::Continue,
                Phase::Deciding => std::hint::spin_loop(),
                Phase::Decided => match self.decision.get() {
                    Some(outcome) => return outcome.clone(),
                    None => std::hint::spin_loop(),
                },
            }
        }
    }

    /// Hand the verdict from the party at `turn` to the next one. A party
    /// that continued leaves `Continue` as the standing disposition. Returns
    /// false if the verdict is sealed or `turn` is not active.
    pub fn advance(&self, turn: u32) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (active, phase) = unpack(current);
            if active != turn || phase.is_sealed() {
                return false;
            }
            let next_phase = match phase {
                Phase::Open => Phase::Open,
                _ => Phase::OpenContinued,
            };
            let next = pack(turn.saturating_add(1), next_phase);
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Timeout fallback: fail with the default reason code unless the party at
    /// `turn` already sealed the verdict or its turn has passed. Returns true
    /// when the failure was applied.
    pub fn force_fail(&self, turn: u32) -> bool {
        self.seal(
            turn,
            |phase| !phase.is_sealed(),
            Outcome::Fail {
                code: K::DEFAULT_FAIL_CODE,
                reason: None,
            },
        )
    }

    fn write(&self, turn: u32, method: &'static str, outcome: Outcome<K::FailCode>) -> Result<(), VerdictError> {
        let applied = if outcome.is_terminal() {
            self.seal(turn, Phase::accepts_writes, outcome)
        } else {
            self.transition(turn, Phase::accepts_writes, Phase::Continued)
        };
        if applied {
            Ok(())
        } else {
            Err(VerdictError::AlreadyDecided { method })
        }
    }

    fn seal(&self, turn: u32, allowed: impl Fn(Phase) -> bool, outcome: Outcome<K::FailCode>) -> bool {
        if !self.transition(turn, allowed, Phase::Deciding) {
            return false;
        }
        // only the single CAS winner reaches this point
        let _ = self.decision.set(outcome);
        self.state.store(pack(turn, Phase::Decided), Ordering::Release);
        true
    }

    fn transition(&self, turn: u32, allowed: impl Fn(Phase) -> bool, target: Phase) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (active, phase) = unpack(current);
            if active != turn || !allowed(phase) {
                return false;
            }
            match self.state.compare_exchange(
                current,
                pack(turn, target),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

/// The output object handed to one extension call.
pub struct VerdictHandle<K: VerdictKind> {
    verdict: Arc<AuthorizationVerdict<K>>,
    turn: u32,
}

impl<K: VerdictKind> Clone for VerdictHandle<K> {
    fn clone(&self) -> Self {
        Self {
            verdict: self.verdict.clone(),
            turn: self.turn,
        }
    }
}

impl<K: VerdictKind> VerdictHandle<K> {
    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn is_decided(&self) -> bool {
        self.verdict.is_decided()
    }

    /// Allow the operation. Seals the verdict.
    pub fn succeed(&self) -> Result<(), VerdictError> {
        self.verdict.write(self.turn, "succeed", Outcome::Success)
    }

    /// Deny with the default reason code. Seals the verdict.
    pub fn fail(&self) -> Result<(), VerdictError> {
        self.verdict.write(
            self.turn,
            "fail",
            Outcome::Fail {
                code: K::DEFAULT_FAIL_CODE,
                reason: None,
            },
        )
    }

    pub fn fail_with_code(&self, code: K::FailCode) -> Result<(), VerdictError> {
        K::check_fail_code(code)?;
        self.verdict.write(
            self.turn,
            "fail_with_code",
            Outcome::Fail { code, reason: None },
        )
    }

    pub fn fail_with_reason(
        &self,
        code: K::FailCode,
        reason: impl Into<String>,
    ) -> Result<(), VerdictError> {
        K::check_fail_code(code)?;
        self.verdict.write(
            self.turn,
            "fail_with_reason",
            Outcome::Fail {
                code,
                reason: Some(reason.into()),
            },
        )
    }

    /// Disconnect the client with `NotAuthorized`. Seals the verdict.
    pub fn disconnect(&self) -> Result<(), VerdictError> {
        self.verdict.write(
            self.turn,
            "disconnect",
            Outcome::Disconnect {
                code: DisconnectReasonCode::NotAuthorized,
                reason: None,
            },
        )
    }

    pub fn disconnect_with_code(&self, code: DisconnectReasonCode) -> Result<(), VerdictError> {
        check_disconnect_code(code)?;
        self.verdict.write(
            self.turn,
            "disconnect_with_code",
            Outcome::Disconnect { code, reason: None },
        )
    }

    pub fn disconnect_with_reason(
        &self,
        code: DisconnectReasonCode,
        reason: impl Into<String>,
    ) -> Result<(), VerdictError> {
        check_disconnect_code(code)?;
        self.verdict.write(
            self.turn,
            "disconnect_with_reason",
            Outcome::Disconnect {
                code,
                reason: Some(reason.into()),
            },
        )
    }

    /// Leave the decision to the next extension, or the default policy if
    /// this is the last one. Only this party's turn is sealed.
    pub fn continue_to_next(&self) -> Result<(), VerdictError> {
        self.verdict
            .write(self.turn, "continue_to_next", Outcome::Continue)
    }
}

fn check_disconnect_code(code: DisconnectReasonCode) -> Result<(), VerdictError> {
    if code == DisconnectReasonCode::NormalDisconnection {
        return Err(VerdictError::InvalidReasonCode(format!("{code:?}")));
    }
    Ok(())
}
