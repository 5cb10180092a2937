use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    // ── Names / values ───────────────────────────────────────────────────────
    #[error("name starting with '.' is reserved for system usage")]
    NameReserved,

    #[error("name exceeds maximum packed length: {0}")]
    NameTooLong(String),

    #[error("name contains characters outside [.0-9A-Za-z]: {0}")]
    NameCharset(String),

    #[error("address is reserved and cannot be used here")]
    AddressReserved,

    #[error("malformed address encoding")]
    AddressFormat,

    #[error("invalid asset or symbol: {0}")]
    AssetSymbol(String),

    #[error("asset precision does not match fungible: expected {expected}, got {got}")]
    AssetPrecision { expected: u8, got: u8 },

    #[error("arithmetic overflow in asset operation")]
    MathOverflow,

    #[error("invalid percent value: {0}")]
    PercentValue(String),

    // ── Permissions / groups ─────────────────────────────────────────────────
    #[error("permission is not valid: {0}")]
    PermissionType(String),

    #[error("authorizer reference is not valid")]
    AuthorizerRef,

    #[error("group is not valid: {0}")]
    GroupType(String),

    #[error("group key cannot be used here")]
    GroupKey,

    #[error("group name does not match: act {act}, group {group}")]
    GroupName { act: String, group: String },

    #[error("max authority recursion depth exceeded")]
    AuthorityDepth,

    // ── State conflicts ──────────────────────────────────────────────────────
    #[error("domain {0} already exists")]
    DomainDuplicate(String),

    #[error("group {0} already exists")]
    GroupDuplicate(String),

    #[error("fungible with symbol id {0} already exists")]
    FungibleDuplicate(u32),

    #[error("token {1} in {0} already exists")]
    TokenDuplicate(String, String),

    #[error("suspend {0} already exists")]
    SuspendDuplicate(String),

    #[error("lock {0} already exists")]
    LockDuplicate(String),

    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    #[error("unknown token: {1} in {0}")]
    UnknownToken(String, String),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("unknown fungible: symbol id {0}")]
    UnknownFungible(u32),

    #[error("unknown suspend proposal: {0}")]
    UnknownSuspend(String),

    #[error("unknown lock proposal: {0}")]
    UnknownLock(String),

    #[error("unknown validator: {0}")]
    UnknownValidator(String),

    #[error("unknown stakepool: symbol id {0}")]
    UnknownStakepool(u32),

    #[error("unknown passive bonus: symbol id {0}")]
    UnknownBonus(u32),

    #[error("unknown script: {0}")]
    UnknownScript(String),

    #[error("token is destroyed")]
    TokenDestroyed,

    #[error("token is locked")]
    TokenLocked,

    #[error("tokens in domain {0} cannot be destroyed")]
    TokenCannotDestroy(String),

    #[error("token owner is not valid")]
    TokenOwner,

    #[error("address does not have enough balance left")]
    Balance,

    #[error("exceeds total supply of fungible")]
    FungibleSupply,

    #[error("fungible address is not valid")]
    FungibleAddress,

    #[error("fungible name or symbol name is not valid")]
    FungibleName,

    // ── Authorization ────────────────────────────────────────────────────────
    #[error("{name} action in domain {domain} with key {key} failed authorization")]
    UnsatisfiedAuthorization { domain: String, key: String, name: String },

    #[error("authorized information does not match the action")]
    ActionAuthorize,

    #[error("payer must sign the transaction")]
    Payer,

    #[error("charge {charge} exceeds payer funds or max_charge {max}")]
    ChargeExceeded { charge: u64, max: u64 },

    #[error("provided keys are not required by the suspend transaction")]
    SuspendNotRequiredKeys,

    #[error("key has already signed this suspend transaction")]
    SuspendDuplicateKey,

    #[error("executor has not signed this suspend transaction")]
    SuspendExecutor,

    #[error("suspend transaction is not in 'proposed' status")]
    SuspendStatus,

    #[error("suspend transaction is expired")]
    SuspendExpired,

    #[error("action is not allowed in a suspend transaction")]
    SuspendInvalidAction,

    #[error("creator is not involved in the entity's permissions")]
    MetaInvolve,

    #[error("meta key is reserved or duplicated")]
    MetaKey,

    #[error("meta value is not valid for its reserved key")]
    MetaValue,

    #[error("prodvote configuration key is not valid: {0}")]
    ProdvoteKey(String),

    #[error("prodvote value out of range: {0}")]
    ProdvoteValue(i64),

    #[error("{0} is not an active producer")]
    ProdvoteProducer(String),

    // ── Locks ────────────────────────────────────────────────────────────────
    #[error("lock condition is not valid")]
    LockCondition,

    #[error("lock assets are not valid")]
    LockAssets,

    #[error("lock succeed/failed address list is not valid")]
    LockAddress,

    #[error("lock unlock time or deadline is not valid")]
    LockUnlockTime,

    #[error("lock proposal is expired for approval")]
    LockExpired,

    #[error("lock has not reached its unlock time")]
    LockNotReachUnlockTime,

    #[error("lock has not reached its deadline and conditions are unmet")]
    LockNotReachDeadline,

    #[error("lock approval data is not valid")]
    LockAprvData,

    #[error("approver has already signed this lock proposal")]
    LockDuplicateKey,

    // ── Passive bonus ────────────────────────────────────────────────────────
    #[error("bonus percent out of range")]
    BonusPercentValue,

    #[error("bonus rules are not valid: {0}")]
    BonusRules(String),

    #[error("bonus rules out of order: fixed < percent < remaining-percent")]
    BonusRulesOrder,

    #[error("bonus rules do not fulfill the distribution threshold")]
    BonusRulesNotFullfill,

    #[error("bonus receiver is not valid")]
    BonusReceiver,

    #[error("passive bonus already registered for symbol id {0}")]
    BonusDuplicate(u32),

    #[error("bonus method is not valid for action {0}")]
    BonusMethod(String),

    #[error("accumulated bonus below distribution threshold")]
    BonusUnreachedThreshold,

    // ── Staking ──────────────────────────────────────────────────────────────
    #[error("staking days out of range")]
    StakingDays,

    #[error("stake amount below purchase threshold")]
    StakingAmount,

    #[error("not enough stake units to settle")]
    StakingNotEnough,

    #[error("unstake pending period has not elapsed")]
    StakingPending,

    #[error("stake shares of type or maturity not eligible")]
    StakingShares,

    #[error("validator signer does not match")]
    ValidatorSigner,

    #[error("stakepool already exists: symbol id {0}")]
    StakepoolDuplicate(u32),

    #[error("validator {0} already exists")]
    ValidatorDuplicate(String),

    // ── Transactions / blocks ────────────────────────────────────────────────
    #[error("transaction is expired")]
    TrxExpired,

    #[error("transaction expiration is too far in the future")]
    TrxLifetime,

    #[error("transaction TAPOS reference does not match a recent block")]
    InvalidRefBlock,

    #[error("duplicate transaction: {0}")]
    TrxDuplicate(String),

    #[error("transaction has no actions")]
    TrxNoActions,

    #[error("transaction deadline exceeded")]
    Deadline,

    #[error("block validation failed: {0}")]
    BlockValidate(String),

    #[error("fork database error: {0}")]
    ForkDatabase(String),

    #[error("block does not link to the current head: {0}")]
    UnlinkableBlock(String),

    #[error("block log error: {0}")]
    BlockLog(String),

    #[error("reversible blocks store is inconsistent: {0}")]
    ReversibleBlocks(String),

    #[error("state database error: {0}")]
    Database(String),

    #[error("fatal error raised by a signal handler: {0}")]
    EmitSignal(String),

    // ── Token database ───────────────────────────────────────────────────────
    #[error("token database engine failure: {0}")]
    TokenDatabase(String),

    #[error("token database key not found")]
    UnknownTokenDatabaseKey,

    #[error("savepoint seq {got} must be greater than latest {latest}")]
    TokenDatabaseSeq { got: i64, latest: i64 },

    #[error("no savepoint available")]
    TokenDatabaseNoSavepoint,

    #[error("cannot squash: fewer than two savepoints")]
    TokenDatabaseSquash,

    #[error("savepoint stack is full")]
    TokenDatabaseCapacity,

    #[error("savepoint persist file is dirty; replay from blocks required")]
    TokenDatabaseDirty,

    #[error("savepoint persist file error: {0}")]
    TokenDatabasePersist(String),

    // ── EVT-Link ─────────────────────────────────────────────────────────────
    #[error("EVT-Link version is not supported")]
    EvtLinkVersion,

    #[error("EVT-Link type does not match the action")]
    EvtLinkType,

    #[error("EVT-Link is expired")]
    EvtLinkExpiration,

    #[error("EVT-Link segment {0} is missing or malformed")]
    EvtLinkSegment(u8),

    #[error("duplicate EVT-Link id: {0}")]
    EvtLinkDupe(String),

    #[error("everiPass failed: {0}")]
    Everipass(String),

    #[error("everiPay failed: {0}")]
    Everipay(String),

    // ── Serialization / crypto ───────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("binary data has superfluous trailing bytes")]
    RawUnpack,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("action version {got} is not supported (current {current})")]
    ActionVersion { got: u32, current: u32 },

    #[error("signature recovery failed")]
    SignatureRecover,

    #[error("invalid key or signature encoding")]
    KeyFormat,

    #[error("i/o error: {0}")]
    Io(String),
}

impl ChainError {
    /// Only deadline failures are subjective (producer-local); everything
    /// else is an objective failure that all nodes reproduce.
    pub fn is_subjective(&self) -> bool {
        matches!(self, ChainError::Deadline)
    }
}

impl From<std::io::Error> for ChainError {
    fn from(e: std::io::Error) -> Self {
        ChainError::Io(e.to_string())
    }
}

impl From<bincode::Error> for ChainError {
    fn from(e: bincode::Error) -> Self {
        ChainError::Serialization(e.to_string())
    }
}
