use serde::{Deserialize, Serialize};
use std::fmt;

/// The six result classes, in severity order. Only `Success` and `Claimed`
/// results are written into a closed ledger.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum TerClass {
    /// tel: local error, observed before the transaction propagated.
    Local,
    /// tem: malformed, permanently invalid.
    Malformed,
    /// tef: cannot ever apply against this ledger chain.
    Failure,
    /// ter: cannot apply now; retry against a later ledger.
    Retry,
    /// tes: applied with its intended effects.
    Success,
    /// tec: applied, fee claimed, intended effects void.
    Claimed,
}

/// Transaction engine result codes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Ter {
    // ── tel ──────────────────────────────────────────────────────────────────
    TelLocalError,
    TelInsufFeeP,
    TelCanNotQueue,

    // ── tem ──────────────────────────────────────────────────────────────────
    TemMalformed,
    TemBadAmount,
    TemBadCurrency,
    TemBadExpiration,
    TemBadFee,
    TemBadIssuer,
    TemBadLimit,
    TemBadOffer,
    TemBadPath,
    TemBadPathLoop,
    TemBadSendMax,
    TemBadSequence,
    TemBadSignature,
    TemBadSigner,
    TemBadQuorum,
    TemBadWeight,
    TemDstIsSrc,
    TemDstNeeded,
    TemInvalid,
    TemInvalidFlag,
    TemRedundant,
    TemEmptyPayment,
    TemDisabled,

    // ── tef ──────────────────────────────────────────────────────────────────
    TefAlready,
    TefBadAuth,
    TefBadAuthMaster,
    TefBadLedger,
    TefBadQuorum,
    TefBadSignature,
    TefFailure,
    TefInternal,
    TefMaxLedger,
    TefNoAuthRequired,
    TefNotMultiSigning,
    TefPastSeq,
    TefWrongPrior,
    TefInvariantFailed,
    TefAmendmentBlocked,

    // ── ter ──────────────────────────────────────────────────────────────────
    TerInsufFeeB,
    TerNoAccount,
    TerNoAuth,
    TerNoLine,
    TerOwners,
    TerPreSeq,
    TerQueued,
    TerRetry,

    // ── tes ──────────────────────────────────────────────────────────────────
    TesSuccess,

    // ── tec ──────────────────────────────────────────────────────────────────
    TecClaim,
    TecPathPartial,
    TecPathDry,
    TecUnfundedOffer,
    TecUnfundedPayment,
    TecFailedProcessing,
    TecDirFull,
    TecInsufReserveLine,
    TecInsufReserveOffer,
    TecInsufficientReserve,
    TecNoDst,
    TecNoDstInsufNative,
    TecNoLineInsufReserve,
    TecNoLineRedundant,
    TecNoAlternativeKey,
    TecNoRegularKey,
    TecOwners,
    TecNoIssuer,
    TecNoAuth,
    TecNoLine,
    TecFrozen,
    TecNoTarget,
    TecNoPermission,
    TecNoEntry,
    TecNeedMasterKey,
    TecDstTagNeeded,
    TecInternal,
    TecExpired,
    TecDuplicate,
    TecKilled,
    TecHasObligations,
    TecTooSoon,
    TecInvariantFailed,
}

impl Ter {
    pub fn class(self) -> TerClass {
        use Ter::*;
        match self {
            TelLocalError | TelInsufFeeP | TelCanNotQueue => TerClass::Local,

            TemMalformed | TemBadAmount | TemBadCurrency | TemBadExpiration | TemBadFee
            | TemBadIssuer | TemBadLimit | TemBadOffer | TemBadPath | TemBadPathLoop
            | TemBadSendMax | TemBadSequence | TemBadSignature | TemBadSigner | TemBadQuorum
            | TemBadWeight | TemDstIsSrc | TemDstNeeded | TemInvalid | TemInvalidFlag
            | TemRedundant | TemEmptyPayment | TemDisabled => TerClass::Malformed,

            TefAlready | TefBadAuth | TefBadAuthMaster | TefBadLedger | TefBadQuorum
            | TefBadSignature | TefFailure | TefInternal | TefMaxLedger | TefNoAuthRequired
            | TefNotMultiSigning | TefPastSeq | TefWrongPrior | TefInvariantFailed
            | TefAmendmentBlocked => TerClass::Failure,

            TerInsufFeeB | TerNoAccount | TerNoAuth | TerNoLine | TerOwners | TerPreSeq
            | TerQueued | TerRetry => TerClass::Retry,

            TesSuccess => TerClass::Success,

            _ => TerClass::Claimed,
        }
    }

    /// True when the result is recorded in the ledger (fee charged).
    pub fn is_applied(self) -> bool {
        matches!(self.class(), TerClass::Success | TerClass::Claimed)
    }

    pub fn is_success(self) -> bool {
        self == Ter::TesSuccess
    }

    /// True when the transaction is worth retrying against a later ledger.
    pub fn is_retry(self) -> bool {
        self.class() == TerClass::Retry
    }

    /// Canonical lower-camel token, e.g. `tecPATH_DRY`.
    pub fn token(self) -> &'static str {
        use Ter::*;
        match self {
            TelLocalError => "telLOCAL_ERROR",
            TelInsufFeeP => "telINSUF_FEE_P",
            TelCanNotQueue => "telCAN_NOT_QUEUE",
            TemMalformed => "temMALFORMED",
            TemBadAmount => "temBAD_AMOUNT",
            TemBadCurrency => "temBAD_CURRENCY",
            TemBadExpiration => "temBAD_EXPIRATION",
            TemBadFee => "temBAD_FEE",
            TemBadIssuer => "temBAD_ISSUER",
            TemBadLimit => "temBAD_LIMIT",
            TemBadOffer => "temBAD_OFFER",
            TemBadPath => "temBAD_PATH",
            TemBadPathLoop => "temBAD_PATH_LOOP",
            TemBadSendMax => "temBAD_SEND_MAX",
            TemBadSequence => "temBAD_SEQUENCE",
            TemBadSignature => "temBAD_SIGNATURE",
            TemBadSigner => "temBAD_SIGNER",
            TemBadQuorum => "temBAD_QUORUM",
            TemBadWeight => "temBAD_WEIGHT",
            TemDstIsSrc => "temDST_IS_SRC",
            TemDstNeeded => "temDST_NEEDED",
            TemInvalid => "temINVALID",
            TemInvalidFlag => "temINVALID_FLAG",
            TemRedundant => "temREDUNDANT",
            TemEmptyPayment => "temEMPTY_PAYMENT",
            TemDisabled => "temDISABLED",
            TefAlready => "tefALREADY",
            TefBadAuth => "tefBAD_AUTH",
            TefBadAuthMaster => "tefBAD_AUTH_MASTER",
            TefBadLedger => "tefBAD_LEDGER",
            TefBadQuorum => "tefBAD_QUORUM",
            TefBadSignature => "tefBAD_SIG",
            TefFailure => "tefFAILURE",
            TefInternal => "tefINTERNAL",
            TefMaxLedger => "tefMAX_LEDGER",
            TefNoAuthRequired => "tefNO_AUTH_REQUIRED",
            TefNotMultiSigning => "tefNOT_MULTI_SIGNING",
            TefPastSeq => "tefPAST_SEQ",
            TefWrongPrior => "tefWRONG_PRIOR",
            TefInvariantFailed => "tefINVARIANT_FAILED",
            TefAmendmentBlocked => "tefAMENDMENT_BLOCKED",
            TerInsufFeeB => "terINSUF_FEE_B",
            TerNoAccount => "terNO_ACCOUNT",
            TerNoAuth => "terNO_AUTH",
            TerNoLine => "terNO_LINE",
            TerOwners => "terOWNERS",
            TerPreSeq => "terPRE_SEQ",
            TerQueued => "terQUEUED",
            TerRetry => "terRETRY",
            TesSuccess => "tesSUCCESS",
            TecClaim => "tecCLAIM",
            TecPathPartial => "tecPATH_PARTIAL",
            TecPathDry => "tecPATH_DRY",
            TecUnfundedOffer => "tecUNFUNDED_OFFER",
            TecUnfundedPayment => "tecUNFUNDED_PAYMENT",
            TecFailedProcessing => "tecFAILED_PROCESSING",
            TecDirFull => "tecDIR_FULL",
            TecInsufReserveLine => "tecINSUF_RESERVE_LINE",
            TecInsufReserveOffer => "tecINSUF_RESERVE_OFFER",
            TecInsufficientReserve => "tecINSUFFICIENT_RESERVE",
            TecNoDst => "tecNO_DST",
            TecNoDstInsufNative => "tecNO_DST_INSUF_NATIVE",
            TecNoLineInsufReserve => "tecNO_LINE_INSUF_RESERVE",
            TecNoLineRedundant => "tecNO_LINE_REDUNDANT",
            TecNoAlternativeKey => "tecNO_ALTERNATIVE_KEY",
            TecNoRegularKey => "tecNO_REGULAR_KEY",
            TecOwners => "tecOWNERS",
            TecNoIssuer => "tecNO_ISSUER",
            TecNoAuth => "tecNO_AUTH",
            TecNoLine => "tecNO_LINE",
            TecFrozen => "tecFROZEN",
            TecNoTarget => "tecNO_TARGET",
            TecNoPermission => "tecNO_PERMISSION",
            TecNoEntry => "tecNO_ENTRY",
            TecNeedMasterKey => "tecNEED_MASTER_KEY",
            TecDstTagNeeded => "tecDST_TAG_NEEDED",
            TecInternal => "tecINTERNAL",
            TecExpired => "tecEXPIRED",
            TecDuplicate => "tecDUPLICATE",
            TecKilled => "tecKILLED",
            TecHasObligations => "tecHAS_OBLIGATIONS",
            TecTooSoon => "tecTOO_SOON",
            TecInvariantFailed => "tecINVARIANT_FAILED",
        }
    }

    /// Metadata code persisted alongside an applied transaction.
    /// tes is 0; tec codes start at 100 in declaration order.
    pub fn meta_code(self) -> Option<u8> {
        if self == Ter::TesSuccess {
            return Some(0);
        }
        if self.class() != TerClass::Claimed {
            return None;
        }
        use Ter::*;
        let tec = [
            TecClaim,
            TecPathPartial,
            TecPathDry,
            TecUnfundedOffer,
            TecUnfundedPayment,
            TecFailedProcessing,
            TecDirFull,
            TecInsufReserveLine,
            TecInsufReserveOffer,
            TecInsufficientReserve,
            TecNoDst,
            TecNoDstInsufNative,
            TecNoLineInsufReserve,
            TecNoLineRedundant,
            TecNoAlternativeKey,
            TecNoRegularKey,
            TecOwners,
            TecNoIssuer,
            TecNoAuth,
            TecNoLine,
            TecFrozen,
            TecNoTarget,
            TecNoPermission,
            TecNoEntry,
            TecNeedMasterKey,
            TecDstTagNeeded,
            TecInternal,
            TecExpired,
            TecDuplicate,
            TecKilled,
            TecHasObligations,
            TecTooSoon,
            TecInvariantFailed,
        ];
        tec.iter()
            .position(|&t| t == self)
            .map(|i| 100 + i as u8)
    }
}

impl fmt::Display for Ter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_partition_severity() {
        assert!(TerClass::Local < TerClass::Malformed);
        assert!(TerClass::Retry < TerClass::Success);
        assert_eq!(Ter::TemBadFee.class(), TerClass::Malformed);
        assert_eq!(Ter::TefPastSeq.class(), TerClass::Failure);
        assert_eq!(Ter::TerPreSeq.class(), TerClass::Retry);
        assert_eq!(Ter::TecPathDry.class(), TerClass::Claimed);
    }

    #[test]
    fn only_tes_and_tec_apply() {
        assert!(Ter::TesSuccess.is_applied());
        assert!(Ter::TecUnfundedPayment.is_applied());
        assert!(!Ter::TerPreSeq.is_applied());
        assert!(!Ter::TemMalformed.is_applied());
    }

    #[test]
    fn meta_codes() {
        assert_eq!(Ter::TesSuccess.meta_code(), Some(0));
        assert_eq!(Ter::TecClaim.meta_code(), Some(100));
        assert_eq!(Ter::TerPreSeq.meta_code(), None);
    }
}
