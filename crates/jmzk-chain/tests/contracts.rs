//! End-to-end scenarios driving a full controller: domain and token
//! lifecycle, fungible payments, suspends, locks, passive bonuses, staking
//! and fork switching.

use std::collections::BTreeSet;

use jmzk_chain::controller::{BlockStatus, Config, Controller};
use jmzk_chain::trx_context;
use jmzk_core::address::{fungible_address, validator_address, Address};
use jmzk_core::asset::{evt_sym, Asset, Symbol};
use jmzk_core::authority::{AuthorizerRef, Group, GroupNode, PermissionDef};
use jmzk_core::block::{BlockTimestamp, ProducerKey, ProducerSchedule, SignedBlock};
use jmzk_core::entities::{
    DistReceiver, DistRule, DomainDef, FungibleDef, LockAprvData, LockAsset, LockCondition,
    LockDef, LockStatus, PassiveMethod, ScriptDef, StakeType, SuspendDef, SuspendStatus,
    TokenDef, ValidatorDef,
};
use jmzk_core::error::ChainError;
use jmzk_core::link::{self, EvtLink};
use jmzk_core::name::Name128;
use jmzk_core::payloads::*;
use jmzk_core::transaction::{Action, SignedTransaction, Transaction};
use jmzk_core::types::{Digest, PublicKey};
use jmzk_core::{n, n128};
use jmzk_crypto::KeyPair;
use jmzk_genesis::GenesisState;
use jmzk_tokendb::TokenType;

// ── Tester ───────────────────────────────────────────────────────────────────

struct ChainTester {
    controller: Controller,
    producer: KeyPair,
    trx_nonce: i64,
    _dir: tempfile::TempDir,
}

impl ChainTester {
    fn new() -> Self {
        Self::with_charges(false)
    }

    fn with_charges(charging: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let producer = KeyPair::from_seed(b"genesis-producer");
        let mut genesis = GenesisState::default();
        genesis.initial_key = producer.public_key;

        let mut conf = Config::new(dir.path(), genesis);
        conf.charge_free_mode = !charging;
        let controller = Controller::open(conf).unwrap();
        Self { controller, producer, trx_nonce: 0, _dir: dir }
    }

    fn head_time(&self) -> i64 {
        self.controller.head_state().header.timestamp.to_unix()
    }

    fn next_slot(&self) -> BlockTimestamp {
        BlockTimestamp(self.controller.head_state().header.timestamp.0 + 1)
    }

    fn make_trx(&mut self, actions: Vec<Action>, signers: &[&KeyPair], payer: &KeyPair) -> SignedTransaction {
        self.trx_nonce += 1;
        let (ref_block_num, ref_block_prefix) = self.controller.ref_block_parts();
        let trx = Transaction {
            expiration: self.head_time() + 900 + self.trx_nonce,
            ref_block_num,
            ref_block_prefix,
            actions,
            payer: Address::PublicKey(payer.public_key),
            max_charge: 1_000_000_000,
        };
        let strx = SignedTransaction::new(trx, vec![]);
        let digest = trx_context::signing_digest(&self.controller.chain_id(), &strx.id());
        let mut signatures: Vec<_> = signers.iter().map(|kp| kp.sign(&digest)).collect();
        if !signers.iter().any(|kp| kp.public_key == payer.public_key) {
            signatures.push(payer.sign(&digest));
        }
        SignedTransaction::new(strx.trx, signatures)
    }

    /// Open a block, push one transaction, and commit. Returns the
    /// transaction's error, if any; the block commits either way.
    fn push(
        &mut self,
        actions: Vec<Action>,
        signers: &[&KeyPair],
        payer: &KeyPair,
    ) -> Result<(), ChainError> {
        let strx = self.make_trx(actions, signers, payer);
        let when = self.next_slot();
        self.controller.start_block(when, 0).unwrap();
        let trace = self.controller.push_transaction(strx, None).unwrap();
        self.finish_block();
        match trace.except {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn finish_block(&mut self) {
        self.controller.finalize_block().unwrap();
        let producer = self.producer.clone();
        self.controller.sign_block(|digest| producer.sign(digest)).unwrap();
        self.controller.commit_block().unwrap();
    }

    fn produce_empty_block(&mut self) -> SignedBlock {
        let when = self.next_slot();
        self.produce_empty_block_at(when)
    }

    fn produce_empty_block_at(&mut self, when: BlockTimestamp) -> SignedBlock {
        self.controller.start_block(when, 0).unwrap();
        self.finish_block();
        self.controller.head_state().block.clone()
    }

    /// Jump forward: the next block lands `days` later.
    fn produce_block_days_later(&mut self, days: i64) {
        let when = BlockTimestamp::from_unix(self.head_time() + days * 24 * 3600);
        self.controller.start_block(when, 0).unwrap();
        self.finish_block();
    }

    fn balance(&self, addr: &Address, sym: Symbol) -> i64 {
        let db = self.controller.services.cache.db();
        match db.read_asset(addr, sym.id(), true).unwrap() {
            Some(bytes) => {
                if sym.id() == 1 {
                    bincode::deserialize::<jmzk_core::entities::PropertyStakes>(&bytes)
                        .unwrap()
                        .amount
                } else {
                    bincode::deserialize::<jmzk_core::entities::Property>(&bytes).unwrap().amount
                }
            }
            None => 0,
        }
    }

    /// Seed a balance directly in the store, bypassing blocks. Charge
    /// tests need a funded payer before any fee can be paid.
    fn seed_evt(&self, to: &KeyPair, amount: i64) {
        self.seed_evt_addr(&Address::PublicKey(to.public_key), amount);
    }

    fn seed_evt_addr(&self, to: &Address, amount: i64) {
        let db = self.controller.services.cache.db();
        let supply_addr = fungible_address(1);
        let mut supply: jmzk_core::entities::PropertyStakes =
            bincode::deserialize(&db.read_asset(&supply_addr, 1, false).unwrap().unwrap()).unwrap();
        supply.amount -= amount;
        db.put_asset(&supply_addr, 1, &bincode::serialize(&supply).unwrap()).unwrap();

        let mut prop = jmzk_core::entities::PropertyStakes::from(
            jmzk_core::entities::Property::new(evt_sym(), 0, 0),
        );
        prop.amount = amount;
        db.put_asset(to, 1, &bincode::serialize(&prop).unwrap()).unwrap();
    }

    fn fund_evt(&mut self, to: &KeyPair, amount: i64) {
        let producer = self.producer.clone();
        let act = Action::new(
            n!("issuefungible"),
            n128!(".fungible"),
            n128!("1"),
            &IssueFungible {
                address: Address::PublicKey(to.public_key),
                number: Asset::new(amount, evt_sym()),
                memo: "fund".into(),
            },
        );
        self.push(vec![act], &[&producer], &producer).unwrap();
    }

    fn read_token<T: serde::de::DeserializeOwned + Clone + Send + Sync + 'static>(
        &self,
        type_: TokenType,
        prefix: Option<Name128>,
        key: Name128,
    ) -> T {
        (*self
            .controller
            .services
            .cache
            .read_token::<T>(type_, prefix, key)
            .unwrap()
            .unwrap())
        .clone()
    }
}

fn simple_permission(name: &str, key: &PublicKey) -> PermissionDef {
    PermissionDef::new(n!(name), 1).with(AuthorizerRef::Account(*key), 1)
}

fn owner_transfer_permission() -> PermissionDef {
    PermissionDef::new(n!("transfer"), 1).with(AuthorizerRef::Owner, 1)
}

fn newdomain_action(name: &str, creator: &KeyPair) -> Action {
    Action::new(
        n!("newdomain"),
        Name128::new(name).unwrap(),
        n128!(".create"),
        &NewDomain {
            name: Name128::new(name).unwrap(),
            creator: creator.public_key,
            issue: simple_permission("issue", &creator.public_key),
            transfer: owner_transfer_permission(),
            manage: simple_permission("manage", &creator.public_key),
        },
    )
}

fn new_fungible_actions(sym: Symbol, creator: &KeyPair, supply: i64) -> Action {
    Action::new(
        n!("newfungible"),
        n128!(".fungible"),
        Name128::from_number(sym.id() as u128),
        &NewFungible {
            name: Name128::from_number(sym.id() as u128),
            sym_name: n128!("TEST"),
            sym,
            creator: creator.public_key,
            issue: simple_permission("issue", &creator.public_key),
            transfer: owner_transfer_permission(),
            manage: simple_permission("manage", &creator.public_key),
            total_supply: Asset::new(supply, sym),
        },
    )
}

// ── S1: domain / issue / transfer / destroy ──────────────────────────────────

#[test]
fn s1_token_lifecycle() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let k2 = KeyPair::from_seed(b"k2");
    let k3 = KeyPair::from_seed(b"k3");

    t.push(vec![newdomain_action("domain1", &k1)], &[&k1], &k1).unwrap();

    let issue = Action::new(
        n!("issuetoken"),
        n128!("domain1"),
        n128!(".issue"),
        &IssueToken {
            domain: n128!("domain1"),
            names: vec![n128!("t1")],
            owner: vec![Address::PublicKey(k2.public_key)],
        },
    );
    t.push(vec![issue], &[&k1], &k1).unwrap();

    let transfer = Action::new(
        n!("transfer"),
        n128!("domain1"),
        n128!("t1"),
        &TransferToken {
            domain: n128!("domain1"),
            name: n128!("t1"),
            to: vec![Address::PublicKey(k3.public_key)],
            memo: String::new(),
        },
    );
    t.push(vec![transfer], &[&k2], &k2).unwrap();

    let token: TokenDef = t.read_token(TokenType::Token, Some(n128!("domain1")), n128!("t1"));
    assert_eq!(token.owner, vec![Address::PublicKey(k3.public_key)]);

    let destroy = Action::new(
        n!("destroytoken"),
        n128!("domain1"),
        n128!("t1"),
        &DestroyToken { domain: n128!("domain1"), name: n128!("t1") },
    );
    t.push(vec![destroy], &[&k3], &k3).unwrap();

    let token: TokenDef = t.read_token(TokenType::Token, Some(n128!("domain1")), n128!("t1"));
    assert_eq!(token.owner, vec![Address::Reserved]);

    // A destroyed token cannot move again.
    let transfer_again = Action::new(
        n!("transfer"),
        n128!("domain1"),
        n128!("t1"),
        &TransferToken {
            domain: n128!("domain1"),
            name: n128!("t1"),
            to: vec![Address::PublicKey(k2.public_key)],
            memo: String::new(),
        },
    );
    let err = t.push(vec![transfer_again], &[&k3], &k3).unwrap_err();
    assert!(
        matches!(err, ChainError::UnsatisfiedAuthorization { .. } | ChainError::TokenDestroyed),
        "unexpected: {err}"
    );
}

#[test]
fn duplicate_domain_rejected() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    t.push(vec![newdomain_action("dupdom", &k1)], &[&k1], &k1).unwrap();
    let err = t.push(vec![newdomain_action("dupdom", &k1)], &[&k1], &k1).unwrap_err();
    assert!(matches!(err, ChainError::DomainDuplicate(_)));
}

#[test]
fn reserved_domain_name_rejected() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let err = t.push(vec![newdomain_action(".sys", &k1)], &[&k1], &k1).unwrap_err();
    assert!(matches!(err, ChainError::NameReserved));
}

#[test]
fn unauthorized_issue_rejected() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let outsider = KeyPair::from_seed(b"outsider");
    t.push(vec![newdomain_action("authdom", &k1)], &[&k1], &k1).unwrap();

    let issue = Action::new(
        n!("issuetoken"),
        n128!("authdom"),
        n128!(".issue"),
        &IssueToken {
            domain: n128!("authdom"),
            names: vec![n128!("t1")],
            owner: vec![Address::PublicKey(outsider.public_key)],
        },
    );
    let err = t.push(vec![issue], &[&outsider], &outsider).unwrap_err();
    assert!(matches!(err, ChainError::UnsatisfiedAuthorization { .. }));
}

// ── S2: everipay ─────────────────────────────────────────────────────────────

fn pay_link(signer: &KeyPair, sym_id: u32, max_pay: u32, link_id: [u8; 16], now: i64) -> EvtLink {
    let mut l = EvtLink::new(link::VERSION1 | link::EVERIPAY);
    l.set_int(link::TIMESTAMP, now as u32);
    l.set_int(link::SYMBOL_ID, sym_id);
    l.set_int(link::MAX_PAY, max_pay);
    l.set_bytes16(link::LINK_ID, link_id);
    let sig = signer.sign(&l.signing_digest());
    l.signatures.push(sig);
    l
}

#[test]
fn s2_everipay_and_duplicate_link() {
    let mut t = ChainTester::new();
    let creator = KeyPair::from_seed(b"creator");
    let a = KeyPair::from_seed(b"payer-a");
    let b = KeyPair::from_seed(b"payee-b");
    let sym = Symbol::new(5, 3);

    t.push(vec![new_fungible_actions(sym, &creator, 1_000_000_00000)], &[&creator], &creator)
        .unwrap();
    let issue = Action::new(
        n!("issuefungible"),
        n128!(".fungible"),
        n128!("3"),
        &IssueFungible {
            address: Address::PublicKey(a.public_key),
            number: Asset::new(500_00000, sym),
            memo: String::new(),
        },
    );
    t.push(vec![issue], &[&creator], &creator).unwrap();

    let now = t.head_time();
    let link = pay_link(&a, 3, 5_000_000, *b"KIJHNHFMJDUKJUAA", now);
    let pay = Action::new(
        n!("everipay"),
        n128!(".fungible"),
        n128!("3"),
        &EveriPay {
            link,
            payee: Address::PublicKey(b.public_key),
            number: Asset::new(50_00000, sym),
            memo: String::new(),
        },
    );
    let carrier = KeyPair::from_seed(b"carrier");
    t.push(vec![pay], &[&carrier], &carrier).unwrap();

    assert_eq!(t.balance(&Address::PublicKey(a.public_key), sym), 450_00000);
    assert_eq!(t.balance(&Address::PublicKey(b.public_key), sym), 50_00000);

    // Same link id, different amount: rejected as a duplicate.
    let now = t.head_time();
    let link2 = pay_link(&a, 3, 5_000_000, *b"KIJHNHFMJDUKJUAA", now);
    let pay2 = Action::new(
        n!("everipay"),
        n128!(".fungible"),
        n128!("3"),
        &EveriPay {
            link: link2,
            payee: Address::PublicKey(b.public_key),
            number: Asset::new(10_00000, sym),
            memo: String::new(),
        },
    );
    let err = t.push(vec![pay2], &[&carrier], &carrier).unwrap_err();
    assert!(matches!(err, ChainError::EvtLinkDupe(_)));
}

#[test]
fn everipay_respects_max_pay() {
    let mut t = ChainTester::new();
    let creator = KeyPair::from_seed(b"creator");
    let a = KeyPair::from_seed(b"payer-a");
    let b = KeyPair::from_seed(b"payee-b");
    let sym = Symbol::new(5, 3);

    t.push(vec![new_fungible_actions(sym, &creator, 1_000_000_00000)], &[&creator], &creator)
        .unwrap();
    let issue = Action::new(
        n!("issuefungible"),
        n128!(".fungible"),
        n128!("3"),
        &IssueFungible {
            address: Address::PublicKey(a.public_key),
            number: Asset::new(500_00000, sym),
            memo: String::new(),
        },
    );
    t.push(vec![issue], &[&creator], &creator).unwrap();

    let now = t.head_time();
    let link = pay_link(&a, 3, 100, *b"AAAABBBBCCCCDDDD", now);
    let pay = Action::new(
        n!("everipay"),
        n128!(".fungible"),
        n128!("3"),
        &EveriPay {
            link,
            payee: Address::PublicKey(b.public_key),
            number: Asset::new(101, sym),
            memo: String::new(),
        },
    );
    let err = t.push(vec![pay], &[&a], &a).unwrap_err();
    assert!(matches!(err, ChainError::Everipay(_)));
}

// ── S3: suspend lifecycle ────────────────────────────────────────────────────

#[test]
fn s3_suspend_execution() {
    let mut t = ChainTester::new();
    let kc = KeyPair::from_seed(b"kc");
    let proposer = KeyPair::from_seed(b"proposer");

    // The embedded transaction creates a domain under Kc's authority.
    let (ref_block_num, ref_block_prefix) = t.controller.ref_block_parts();
    let embedded = Transaction {
        expiration: t.head_time() + 3000,
        ref_block_num,
        ref_block_prefix,
        actions: vec![newdomain_action("suspdom", &kc)],
        payer: Address::PublicKey(kc.public_key),
        max_charge: 1_000_000_000,
    };

    let propose = Action::new(
        n!("newsuspend"),
        n128!(".suspend"),
        n128!("susp1"),
        &NewSuspend { name: n128!("susp1"), proposer: proposer.public_key, trx: embedded.clone() },
    );
    t.push(vec![propose], &[&proposer], &proposer).unwrap();

    // Kc approves by signing the embedded transaction.
    let digest = trx_context::signing_digest(&t.controller.chain_id(), &embedded.id());
    let aprv = Action::new(
        n!("aprvsuspend"),
        n128!(".suspend"),
        n128!("susp1"),
        &AprvSuspend { name: n128!("susp1"), signatures: vec![kc.sign(&digest)] },
    );
    t.push(vec![aprv], &[&proposer], &proposer).unwrap();

    let susp: SuspendDef = t.read_token(TokenType::Suspend, None, n128!("susp1"));
    assert_eq!(susp.status, SuspendStatus::Proposed);
    assert!(susp.signed_keys.contains(&kc.public_key));

    let exec = Action::new(
        n!("execsuspend"),
        n128!(".suspend"),
        n128!("susp1"),
        &ExecSuspend { name: n128!("susp1"), executor: kc.public_key },
    );
    t.push(vec![exec], &[&kc], &kc).unwrap();

    let susp: SuspendDef = t.read_token(TokenType::Suspend, None, n128!("susp1"));
    assert_eq!(susp.status, SuspendStatus::Executed);
    assert!(t
        .controller
        .services
        .cache
        .exists_token(TokenType::Domain, None, n128!("suspdom"))
        .unwrap());
}

#[test]
fn suspend_rejects_suspend_domain_actions() {
    let mut t = ChainTester::new();
    let proposer = KeyPair::from_seed(b"proposer");

    let (ref_block_num, ref_block_prefix) = t.controller.ref_block_parts();
    let inner_cancel = Action::new(
        n!("cancelsuspend"),
        n128!(".suspend"),
        n128!("other"),
        &CancelSuspend { name: n128!("other") },
    );
    let embedded = Transaction {
        expiration: t.head_time() + 3000,
        ref_block_num,
        ref_block_prefix,
        actions: vec![inner_cancel],
        payer: Address::PublicKey(proposer.public_key),
        max_charge: 0,
    };
    let propose = Action::new(
        n!("newsuspend"),
        n128!(".suspend"),
        n128!("susp2"),
        &NewSuspend { name: n128!("susp2"), proposer: proposer.public_key, trx: embedded },
    );
    let err = t.push(vec![propose], &[&proposer], &proposer).unwrap_err();
    assert!(matches!(err, ChainError::SuspendInvalidAction));
}

// ── S4: passive bonus ────────────────────────────────────────────────────────

#[test]
fn s4_passive_bonus_distribution() {
    let mut t = ChainTester::new();
    let creator = KeyPair::from_seed(b"creator");
    let a = KeyPair::from_seed(b"holder-a");
    let b = KeyPair::from_seed(b"holder-b");
    let r1 = KeyPair::from_seed(b"recv-1");
    let r3 = KeyPair::from_seed(b"recv-3");
    let sym = Symbol::new(5, 3);

    t.push(vec![new_fungible_actions(sym, &creator, 10_000_000_00000)], &[&creator], &creator)
        .unwrap();
    for (kp, amount) in [(&a, 500_00000i64), (&b, 100_00000)] {
        let issue = Action::new(
            n!("issuefungible"),
            n128!(".fungible"),
            n128!("3"),
            &IssueFungible {
                address: Address::PublicKey(kp.public_key),
                number: Asset::new(amount, sym),
                memo: String::new(),
            },
        );
        t.push(vec![issue], &[&creator], &creator).unwrap();
    }

    let set = Action::new(
        n!("setpsvbonus"),
        n128!(".bonus"),
        n128!("3"),
        &SetPsvBonus {
            sym,
            rate: "0.15".parse().unwrap(),
            base_charge: Asset::new(10, sym),
            charge_threshold: None,
            minimum_charge: None,
            dist_threshold: Asset::new(1_00000, sym),
            rules: vec![
                DistRule::Fixed {
                    receiver: DistReceiver::Address(Address::PublicKey(r1.public_key)),
                    amount: Asset::new(10000, sym),
                },
                DistRule::Percent {
                    receiver: DistReceiver::FtHolders { threshold: Asset::new(1_00000, sym) },
                    percent: "0.3".parse().unwrap(),
                },
                DistRule::RemainingPercent {
                    receiver: DistReceiver::Address(Address::PublicKey(r3.public_key)),
                    percent: "1".parse().unwrap(),
                },
            ],
            methods: vec![(n!("transferft"), PassiveMethod::OutsideAmount)],
        },
    );
    t.push(vec![set], &[&creator], &creator).unwrap();

    // Move enough volume that 15% + base crosses the 1.00000 threshold.
    let transfer = Action::new(
        n!("transferft"),
        n128!(".fungible"),
        n128!("3"),
        &TransferFt {
            from: Address::PublicKey(a.public_key),
            to: Address::PublicKey(b.public_key),
            number: Asset::new(10_00000, sym),
            memo: String::new(),
        },
    );
    t.push(vec![transfer], &[&a], &a).unwrap();

    let pool = jmzk_core::address::bonus_address(3, 0);
    let accumulated = t.balance(&pool, sym);
    assert_eq!(accumulated, 1_50010); // 15% of 10.00000 plus base 10

    let dist = Action::new(
        n!("distpsvbonus"),
        n128!(".bonus"),
        n128!("3"),
        &DistPsvBonus { sym_id: 3 },
    );
    t.push(vec![dist], &[&creator], &creator).unwrap();

    // Fixed rule first.
    let r1_amt = 10000i64;
    assert_eq!(t.balance(&Address::PublicKey(r1.public_key), sym), r1_amt);

    // Holders split 30% of the post-fixed remainder pro-rata; R3 takes
    // the entire tail, so the books close exactly up to per-holder dust.
    let a_pre_dist = 500_00000 - 10_00000 - 1_50010;
    let b_pre_dist = 110_00000;
    let a_bal = t.balance(&Address::PublicKey(a.public_key), sym);
    let b_bal = t.balance(&Address::PublicKey(b.public_key), sym);
    let holders_paid = (a_bal - a_pre_dist) + (b_bal - b_pre_dist);
    let holders_cap = ("0.3".parse::<jmzk_core::asset::Percent>().unwrap())
        .apply(accumulated - r1_amt);
    assert!(holders_paid > 0 && holders_paid <= holders_cap);
    assert!(a_bal - a_pre_dist > b_bal - b_pre_dist, "larger holder earns the larger cut");

    let r3_bal = t.balance(&Address::PublicKey(r3.public_key), sym);
    assert_eq!(r3_bal, accumulated - r1_amt - holders_paid);

    // A fresh round record exists.
    assert!(t
        .controller
        .services
        .cache
        .exists_token(
            TokenType::PsvbonusDist,
            None,
            Name128::from_number(((3u128) << 32) | 1)
        )
        .unwrap());
}

// ── S5: fork switch ──────────────────────────────────────────────────────────

#[test]
fn s5_fork_switch_to_longer_chain() {
    let mut a = ChainTester::new();
    let mut b = ChainTester::new();

    // Shared genesis, divergent histories: B skips a slot so its blocks
    // have different ids than A's.
    let base = a.controller.head_state().header.timestamp.0;
    let a2 = a.produce_empty_block_at(BlockTimestamp(base + 1));
    let b2 = b.produce_empty_block_at(BlockTimestamp(base + 2));
    let b3 = b.produce_empty_block_at(BlockTimestamp(base + 3));
    let b4 = b.produce_empty_block_at(BlockTimestamp(base + 4));
    assert_ne!(a2.id(), b2.id());

    // B's first block ties A's height; the switch happens once B is longer.
    a.controller.push_block(b2.clone(), BlockStatus::Complete).ok();
    a.controller.push_block(b3.clone(), BlockStatus::Complete).unwrap();
    a.controller.push_block(b4.clone(), BlockStatus::Complete).unwrap();

    assert_eq!(a.controller.head_block_id(), b4.id());
    assert_eq!(a.controller.head_block_num(), 4);
}

#[test]
fn s5_invalid_block_restores_state() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    t.push(vec![newdomain_action("stable", &k1)], &[&k1], &k1).unwrap();
    let head_before = t.controller.head_block_id();

    // A properly signed block whose action merkle root is a lie.
    let producer = t.producer.clone();
    let (state, _) = jmzk_chain::fork_db::BlockState::build_next(
        t.controller.head_state(),
        t.next_slot(),
    );
    let mut header = state.header;
    header.action_mroot = Digest([0xAB; 32]);
    let id = header.id();
    let forged = SignedBlock {
        header,
        producer_signature: producer.sign(&id),
        transactions: vec![],
    };

    let err = t.controller.push_block(forged, BlockStatus::Complete).unwrap_err();
    assert!(matches!(err, ChainError::BlockValidate(_)));

    // Head and state are untouched; the bad subtree is gone.
    assert_eq!(t.controller.head_block_id(), head_before);
    assert!(t
        .controller
        .services
        .cache
        .exists_token(TokenType::Domain, None, n128!("stable"))
        .unwrap());
    assert!(t.controller.fork_db().get_block(&id).is_none());
}

// ── S6: staking ──────────────────────────────────────────────────────────────

#[test]
fn s6_stake_and_unstake() {
    let mut t = ChainTester::new();
    let producer = t.producer.clone();
    let kv = KeyPair::from_seed(b"validator-key");
    let staker = KeyPair::from_seed(b"staker");

    t.fund_evt(&staker, 1_000_000_00000);

    // The EVT pool exists from genesis; producers set its curve.
    let pool = Action::new(
        n!("updstakepool"),
        n128!(".staking"),
        n128!("1"),
        &UpdStakepool {
            sym_id: 1,
            purchase_threshold: Some(Asset::new(5_00000, evt_sym())),
            demand_r: Some(5_000_000_000),
            demand_t: Some(1),
            demand_q: Some(100),
            demand_w: Some(0),
            fixed_r: Some(20_000),
            fixed_t: Some(1),
        },
    );
    t.push(vec![pool], &[&producer], &producer).unwrap();

    let newv = Action::new(
        n!("newvalidator"),
        n128!(".staking"),
        n128!("validator"),
        &NewValidator {
            name: n128!("validator"),
            creator: kv.public_key,
            signer: kv.public_key,
            withdraw: simple_permission("withdraw", &kv.public_key),
            manage: simple_permission("manage", &kv.public_key),
            commission: "0.5".parse().unwrap(),
        },
    );
    t.push(vec![newv], &[&kv], &kv).unwrap();

    let stake = Action::new(
        n!("staketkns"),
        n128!(".staking"),
        n128!("validator"),
        &StakeTkns {
            staker: staker.public_key,
            validator: n128!("validator"),
            amount: Asset::new(500_000_00000, evt_sym()),
            type_: StakeType::Active,
            fixed_days: 0,
        },
    );
    t.push(vec![stake], &[&staker], &staker).unwrap();

    let validator: ValidatorDef = t.read_token(TokenType::Validator, None, n128!("validator"));
    assert_eq!(validator.total_units, 500_000);
    assert_eq!(t.balance(&Address::PublicKey(staker.public_key), evt_sym()), 500_000_00000);

    // Let value accrue, then have the validator update the net value.
    t.produce_block_days_later(90);
    let recv = Action::new(
        n!("recvstkbonus"),
        n128!(".staking"),
        n128!("validator"),
        &RecvStkBonus { validator: n128!("validator"), sym_id: 1 },
    );
    t.push(vec![recv], &[&kv], &kv).unwrap();
    let validator: ValidatorDef = t.read_token(TokenType::Validator, None, n128!("validator"));
    let nv = validator.current_net_value;
    assert!(nv.amount() > Asset::from_units(1, jmzk_core::asset::nav_sym()).amount());

    // Propose an unstake, wait out the pending period, settle.
    let propose = Action::new(
        n!("unstaketkns"),
        n128!(".staking"),
        n128!("validator"),
        &UnstakeTkns {
            staker: staker.public_key,
            validator: n128!("validator"),
            units: 300_000,
            sym_id: 1,
            op: UnstakeOp::Propose,
        },
    );
    t.push(vec![propose], &[&staker], &staker).unwrap();

    // Settling early is refused.
    let settle_early = Action::new(
        n!("unstaketkns"),
        n128!(".staking"),
        n128!("validator"),
        &UnstakeTkns {
            staker: staker.public_key,
            validator: n128!("validator"),
            units: 300_000,
            sym_id: 1,
            op: UnstakeOp::Settle,
        },
    );
    let err = t.push(vec![settle_early.clone()], &[&staker], &staker).unwrap_err();
    assert!(matches!(err, ChainError::StakingPending));

    t.produce_block_days_later(8);
    let pre = t.balance(&Address::PublicKey(staker.public_key), evt_sym());
    t.push(vec![settle_early], &[&staker], &staker).unwrap();
    let post = t.balance(&Address::PublicKey(staker.public_key), evt_sym());

    // The staker gets back the units at current value less commission.
    assert!(post > pre + 299_000_00000, "payout too small: {}", post - pre);

    let validator: ValidatorDef = t.read_token(TokenType::Validator, None, n128!("validator"));
    assert_eq!(validator.total_units, 200_000);
}

// ── Locks ────────────────────────────────────────────────────────────────────

#[test]
fn lock_succeeds_with_threshold() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let k2 = KeyPair::from_seed(b"k2");
    let winner = KeyPair::from_seed(b"winner");
    let loser = KeyPair::from_seed(b"loser");

    t.push(vec![newdomain_action("lockdom", &k1)], &[&k1], &k1).unwrap();
    let issue = Action::new(
        n!("issuetoken"),
        n128!("lockdom"),
        n128!(".issue"),
        &IssueToken {
            domain: n128!("lockdom"),
            names: vec![n128!("nft1")],
            owner: vec![Address::PublicKey(k2.public_key)],
        },
    );
    t.push(vec![issue], &[&k1], &k1).unwrap();

    let now = t.head_time();
    let newlock = Action::new(
        n!("newlock"),
        n128!(".lock"),
        n128!("lock1"),
        &NewLock {
            name: n128!("lock1"),
            proposer: k2.public_key,
            unlock_time: now + 3600,
            deadline: now + 7200,
            assets: vec![LockAsset::Tokens { domain: n128!("lockdom"), names: vec![n128!("nft1")] }],
            condition: LockCondition::CondKeys {
                threshold: 1,
                cond_keys: vec![k1.public_key, k2.public_key],
            },
            succeed: vec![Address::PublicKey(winner.public_key)],
            failed: vec![Address::PublicKey(loser.public_key)],
        },
    );
    t.push(vec![newlock], &[&k2], &k2).unwrap();

    // The escrowed token is owned by the lock address now.
    let token: TokenDef = t.read_token(TokenType::Token, Some(n128!("lockdom")), n128!("nft1"));
    assert!(token.is_locked());

    let aprv = Action::new(
        n!("aprvlock"),
        n128!(".lock"),
        n128!("lock1"),
        &AprvLock { name: n128!("lock1"), approver: k1.public_key, data: LockAprvData::CondKey },
    );
    t.push(vec![aprv], &[&k1], &k1).unwrap();

    t.produce_block_days_later(1);
    let unlock = Action::new(
        n!("tryunlock"),
        n128!(".lock"),
        n128!("lock1"),
        &TryUnlock { name: n128!("lock1"), executor: k2.public_key },
    );
    t.push(vec![unlock], &[&k2], &k2).unwrap();

    let lock: LockDef = t.read_token(TokenType::Lock, None, n128!("lock1"));
    assert_eq!(lock.status, LockStatus::Succeed);
    let token: TokenDef = t.read_token(TokenType::Token, Some(n128!("lockdom")), n128!("nft1"));
    assert_eq!(token.owner, vec![Address::PublicKey(winner.public_key)]);
}

// ── PEVT guards / supply conservation ────────────────────────────────────────

#[test]
fn pevt_is_not_transferable() {
    let mut t = ChainTester::new();
    let a = KeyPair::from_seed(b"a");
    let b = KeyPair::from_seed(b"b");
    t.fund_evt(&a, 100_00000);

    // Convert some EVT into pinned EVT first.
    let convert = Action::new(
        n!("evt2pevt"),
        n128!(".fungible"),
        n128!("1"),
        &Evt2Pevt {
            from: Address::PublicKey(a.public_key),
            to: Address::PublicKey(a.public_key),
            number: Asset::new(50_00000, evt_sym()),
            memo: String::new(),
        },
    );
    t.push(vec![convert], &[&a], &a).unwrap();
    assert_eq!(t.balance(&Address::PublicKey(a.public_key), jmzk_core::asset::pevt_sym()), 50_00000);

    let transfer = Action::new(
        n!("transferft"),
        n128!(".fungible"),
        n128!("2"),
        &TransferFt {
            from: Address::PublicKey(a.public_key),
            to: Address::PublicKey(b.public_key),
            number: Asset::new(10_00000, jmzk_core::asset::pevt_sym()),
            memo: String::new(),
        },
    );
    let err = t.push(vec![transfer], &[&a], &a).unwrap_err();
    assert!(matches!(err, ChainError::AssetSymbol(_)));
}

#[test]
fn supply_is_conserved_across_transfers() {
    let mut t = ChainTester::new();
    let a = KeyPair::from_seed(b"a");
    let b = KeyPair::from_seed(b"b");
    t.fund_evt(&a, 700_00000);

    let transfer = Action::new(
        n!("transferft"),
        n128!(".fungible"),
        n128!("1"),
        &TransferFt {
            from: Address::PublicKey(a.public_key),
            to: Address::PublicKey(b.public_key),
            number: Asset::new(200_00000, evt_sym()),
            memo: String::new(),
        },
    );
    t.push(vec![transfer], &[&a], &a).unwrap();

    // Σ balances + supply address + reserved == total supply.
    let mut total = 0i64;
    t.controller
        .services
        .cache
        .db()
        .read_assets_range(1, 0, |_, bytes| {
            let prop: jmzk_core::entities::PropertyStakes = bincode::deserialize(bytes).unwrap();
            total += prop.amount;
            true
        })
        .unwrap();
    assert_eq!(total, jmzk_genesis::EVT_TOTAL_SUPPLY);
    assert_eq!(t.balance(&Address::PublicKey(b.public_key), evt_sym()), 200_00000);
}

// ── Charges ──────────────────────────────────────────────────────────────────

#[test]
fn charge_debits_payer_and_credits_producer() {
    let mut t = ChainTester::with_charges(true);
    let producer = t.producer.clone();
    let payer = KeyPair::from_seed(b"rich-payer");
    t.seed_evt(&payer, 1_000_00000);

    let pre_payer = t.balance(&Address::PublicKey(payer.public_key), evt_sym());
    let pre_producer = t.balance(&Address::PublicKey(producer.public_key), evt_sym());

    let k1 = KeyPair::from_seed(b"k1");
    let act = newdomain_action("paydom", &k1);
    t.push(vec![act], &[&k1], &payer).unwrap();

    let post_payer = t.balance(&Address::PublicKey(payer.public_key), evt_sym());
    let post_producer = t.balance(&Address::PublicKey(producer.public_key), evt_sym());
    assert!(post_payer < pre_payer, "payer was not debited");
    assert_eq!(pre_payer - post_payer, post_producer - pre_producer);
}

#[test]
fn charge_exceeding_max_fails() {
    let mut t = ChainTester::with_charges(true);
    let payer = KeyPair::from_seed(b"poor-payer");
    t.seed_evt(&payer, 1_000_00000);

    let k1 = KeyPair::from_seed(b"k1");
    let actions = vec![newdomain_action("capdom", &k1)];
    let mut strx = t.make_trx(actions, &[&k1], &payer);
    strx.trx.max_charge = 1; // absurdly low cap
    let digest = trx_context::signing_digest(&t.controller.chain_id(), &strx.id());
    strx.signatures = vec![k1.sign(&digest), payer.sign(&digest)];

    let when = t.next_slot();
    t.controller.start_block(when, 0).unwrap();
    let trace = t.controller.push_transaction(strx, None).unwrap();
    t.finish_block();
    assert!(matches!(trace.except, Some(ChainError::ChargeExceeded { .. })));
}

// ── Replay determinism ───────────────────────────────────────────────────────

#[test]
fn replay_restores_identical_head() {
    let dir = tempfile::tempdir().unwrap();
    let producer = KeyPair::from_seed(b"genesis-producer");
    let mut genesis = GenesisState::default();
    genesis.initial_key = producer.public_key;
    let mut conf = Config::new(dir.path(), genesis);
    conf.charge_free_mode = true;

    let (head_id, head_num) = {
        let mut t = ChainTester {
            controller: Controller::open(conf.clone()).unwrap(),
            producer: producer.clone(),
            trx_nonce: 0,
            _dir: tempfile::tempdir().unwrap(), // placeholder; `dir` above holds the data
        };
        let k1 = KeyPair::from_seed(b"k1");
        t.push(vec![newdomain_action("replayed", &k1)], &[&k1], &k1).unwrap();
        for _ in 0..5 {
            t.produce_empty_block();
        }
        let id = t.controller.head_block_id();
        let num = t.controller.head_block_num();
        t.controller.close().unwrap();
        (id, num)
    };

    let controller = Controller::open(conf).unwrap();
    assert_eq!(controller.head_block_num(), head_num);
    assert_eq!(controller.head_block_id(), head_id);
    assert!(controller
        .services
        .cache
        .exists_token(TokenType::Domain, None, n128!("replayed"))
        .unwrap());
}

// ── Misc guards ──────────────────────────────────────────────────────────────

#[test]
fn expired_transaction_rejected() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let mut strx = t.make_trx(vec![newdomain_action("latedom", &k1)], &[&k1], &k1);
    strx.trx.expiration = t.head_time() - 10;
    let digest = trx_context::signing_digest(&t.controller.chain_id(), &strx.id());
    strx.signatures = vec![k1.sign(&digest)];

    let when = t.next_slot();
    t.controller.start_block(when, 0).unwrap();
    let trace = t.controller.push_transaction(strx, None).unwrap();
    t.finish_block();
    assert!(matches!(trace.except, Some(ChainError::TrxExpired)));
}

#[test]
fn bad_tapos_rejected() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let mut strx = t.make_trx(vec![newdomain_action("taposdom", &k1)], &[&k1], &k1);
    strx.trx.ref_block_prefix ^= 0xdead_beef;
    let digest = trx_context::signing_digest(&t.controller.chain_id(), &strx.id());
    strx.signatures = vec![k1.sign(&digest)];

    let when = t.next_slot();
    t.controller.start_block(when, 0).unwrap();
    let trace = t.controller.push_transaction(strx, None).unwrap();
    t.finish_block();
    assert!(matches!(trace.except, Some(ChainError::InvalidRefBlock)));
}

#[test]
fn duplicate_transaction_rejected() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let strx = t.make_trx(vec![newdomain_action("dupdtrx", &k1)], &[&k1], &k1);

    let when = t.next_slot();
    t.controller.start_block(when, 0).unwrap();
    let first = t.controller.push_transaction(strx.clone(), None).unwrap();
    assert!(first.except.is_none());
    let second = t.controller.push_transaction(strx, None).unwrap();
    t.finish_block();
    assert!(matches!(second.except, Some(ChainError::TrxDuplicate(_))));
}

#[test]
fn failed_transaction_leaves_block_intact() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let k2 = KeyPair::from_seed(b"k2");

    let when = t.next_slot();
    t.controller.start_block(when, 0).unwrap();

    let good = t.make_trx(vec![newdomain_action("gooddom", &k1)], &[&k1], &k1);
    let bad = t.make_trx(vec![newdomain_action("baddom", &k2)], &[&k1], &k1); // wrong signer

    assert!(t.controller.push_transaction(good, None).unwrap().except.is_none());
    assert!(t.controller.push_transaction(bad, None).unwrap().except.is_some());
    t.finish_block();

    assert!(t
        .controller
        .services
        .cache
        .exists_token(TokenType::Domain, None, n128!("gooddom"))
        .unwrap());
    assert!(!t
        .controller
        .services
        .cache
        .exists_token(TokenType::Domain, None, n128!("baddom"))
        .unwrap());
}

// ── everiPass ────────────────────────────────────────────────────────────────

fn pass_link(signer: &KeyPair, domain: &str, token: &str, now: i64, destroy: bool) -> EvtLink {
    let mut flags = link::VERSION1 | link::EVERIPASS;
    if destroy {
        flags |= link::DESTROY;
    }
    let mut l = EvtLink::new(flags);
    l.set_int(link::TIMESTAMP, now as u32);
    l.set_str(link::DOMAIN, domain);
    l.set_str(link::TOKEN, token);
    let sig = signer.sign(&l.signing_digest());
    l.signatures.push(sig);
    l
}

fn everipass_action(domain: &str, token: &str, link: EvtLink) -> Action {
    Action::new(
        n!("everipass"),
        Name128::new(domain).unwrap(),
        Name128::new(token).unwrap(),
        &EveriPass { link, memo: String::new() },
    )
}

fn setup_pass_token(t: &mut ChainTester, issuer: &KeyPair, owner: &KeyPair) {
    t.push(vec![newdomain_action("passdom", issuer)], &[issuer], issuer).unwrap();
    let issue = Action::new(
        n!("issuetoken"),
        n128!("passdom"),
        n128!(".issue"),
        &IssueToken {
            domain: n128!("passdom"),
            names: vec![n128!("pt1")],
            owner: vec![Address::PublicKey(owner.public_key)],
        },
    );
    t.push(vec![issue], &[issuer], issuer).unwrap();
}

#[test]
fn everipass_requires_exact_owner_signatures() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let k2 = KeyPair::from_seed(b"k2");
    let intruder = KeyPair::from_seed(b"intruder");
    let carrier = KeyPair::from_seed(b"carrier");
    setup_pass_token(&mut t, &k1, &k2);

    // The owner's link passes; the token is untouched.
    let link = pass_link(&k2, "passdom", "pt1", t.head_time(), false);
    t.push(vec![everipass_action("passdom", "pt1", link)], &[&carrier], &carrier).unwrap();
    let token: TokenDef = t.read_token(TokenType::Token, Some(n128!("passdom")), n128!("pt1"));
    assert_eq!(token.owner, vec![Address::PublicKey(k2.public_key)]);

    // A link signed by anyone else is rejected.
    let forged = pass_link(&intruder, "passdom", "pt1", t.head_time(), false);
    let err = t
        .push(vec![everipass_action("passdom", "pt1", forged)], &[&carrier], &carrier)
        .unwrap_err();
    assert!(matches!(err, ChainError::Everipass(_)));
}

#[test]
fn everipass_destroy_flag_consumes_token() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let k2 = KeyPair::from_seed(b"k2");
    let carrier = KeyPair::from_seed(b"carrier");
    setup_pass_token(&mut t, &k1, &k2);

    // The destroy flag re-checks destroy authority against the link keys,
    // then marks the token destroyed.
    let link = pass_link(&k2, "passdom", "pt1", t.head_time(), true);
    t.push(vec![everipass_action("passdom", "pt1", link)], &[&carrier], &carrier).unwrap();
    let token: TokenDef = t.read_token(TokenType::Token, Some(n128!("passdom")), n128!("pt1"));
    assert_eq!(token.owner, vec![Address::Reserved]);

    // A destroyed token no longer passes.
    let link = pass_link(&k2, "passdom", "pt1", t.head_time(), false);
    let err = t
        .push(vec![everipass_action("passdom", "pt1", link)], &[&carrier], &carrier)
        .unwrap_err();
    assert!(matches!(err, ChainError::TokenDestroyed));
}

// ── Metadata ─────────────────────────────────────────────────────────────────

fn addmeta_action(domain: Name128, key: Name128, meta_key: &str, value: &str, creator: &KeyPair) -> Action {
    Action::new(
        n!("addmeta"),
        domain,
        key,
        &AddMeta {
            key: Name128::new(meta_key).unwrap(),
            value: value.to_string(),
            creator: AuthorizerRef::Account(creator.public_key),
        },
    )
}

#[test]
fn addmeta_covers_every_entity() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let k2 = KeyPair::from_seed(b"k2");
    let fcreator = KeyPair::from_seed(b"fcreator");
    let sym = Symbol::new(5, 3);

    t.push(vec![newdomain_action("metadom", &k1)], &[&k1], &k1).unwrap();
    let issue = Action::new(
        n!("issuetoken"),
        n128!("metadom"),
        n128!(".issue"),
        &IssueToken {
            domain: n128!("metadom"),
            names: vec![n128!("mtok")],
            owner: vec![Address::PublicKey(k2.public_key)],
        },
    );
    t.push(vec![issue], &[&k1], &k1).unwrap();
    t.push(vec![new_fungible_actions(sym, &fcreator, 1_000_00000)], &[&fcreator], &fcreator)
        .unwrap();
    let group = Group {
        name: n128!("metagrp"),
        key: Address::PublicKey(k1.public_key),
        root: GroupNode::Branch {
            threshold: 1,
            weight: 0,
            nodes: vec![GroupNode::Leaf { key: k1.public_key, weight: 1 }],
        },
        metas: vec![],
    };
    let newgrp = Action::new(
        n!("newgroup"),
        n128!(".group"),
        n128!("metagrp"),
        &NewGroup { name: n128!("metagrp"), group },
    );
    t.push(vec![newgrp], &[&k1], &k1).unwrap();

    // Domain metas go through the manage permission.
    t.push(vec![addmeta_action(n128!("metadom"), n128!(".meta"), "note", "d", &k1)], &[&k1], &k1)
        .unwrap();
    let domain: DomainDef = t.read_token(TokenType::Domain, None, n128!("metadom"));
    assert_eq!(domain.metas.len(), 1);
    assert_eq!(domain.metas[0].value, "d");

    // Token metas accept the current owner.
    t.push(vec![addmeta_action(n128!("metadom"), n128!("mtok"), "note", "t", &k2)], &[&k2], &k2)
        .unwrap();
    let token: TokenDef = t.read_token(TokenType::Token, Some(n128!("metadom")), n128!("mtok"));
    assert_eq!(token.metas[0].value, "t");

    // Group metas accept only the group key.
    t.push(vec![addmeta_action(n128!(".group"), n128!("metagrp"), "note", "g", &k1)], &[&k1], &k1)
        .unwrap();
    let group: Group = t.read_token(TokenType::Group, None, n128!("metagrp"));
    assert_eq!(group.metas[0].value, "g");

    // Fungible metas accept the creator.
    t.push(
        vec![addmeta_action(n128!(".fungible"), n128!("3"), "note", "f", &fcreator)],
        &[&fcreator],
        &fcreator,
    )
    .unwrap();
    let fungible: FungibleDef = t.read_token(TokenType::Fungible, None, n128!("3"));
    assert_eq!(fungible.metas[0].value, "f");

    // Duplicate keys are rejected.
    let err = t
        .push(vec![addmeta_action(n128!("metadom"), n128!(".meta"), "note", "x", &k1)], &[&k1], &k1)
        .unwrap_err();
    assert!(matches!(err, ChainError::MetaKey));

    // An uninvolved creator cannot annotate a token.
    let outsider = KeyPair::from_seed(b"outsider");
    let err = t
        .push(
            vec![addmeta_action(n128!("metadom"), n128!("mtok"), "spam", "x", &outsider)],
            &[&outsider],
            &outsider,
        )
        .unwrap_err();
    assert!(matches!(err, ChainError::MetaInvolve));
}

#[test]
fn disable_destroy_meta_blocks_destroytoken() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let k2 = KeyPair::from_seed(b"k2");
    t.push(vec![newdomain_action("frozen", &k1)], &[&k1], &k1).unwrap();
    let issue = Action::new(
        n!("issuetoken"),
        n128!("frozen"),
        n128!(".issue"),
        &IssueToken {
            domain: n128!("frozen"),
            names: vec![n128!("ice")],
            owner: vec![Address::PublicKey(k2.public_key)],
        },
    );
    t.push(vec![issue], &[&k1], &k1).unwrap();

    // The reserved key is whitelisted on domains, with a boolean value.
    t.push(
        vec![addmeta_action(n128!("frozen"), n128!(".meta"), ".disable-destroy", "true", &k1)],
        &[&k1],
        &k1,
    )
    .unwrap();

    let destroy = Action::new(
        n!("destroytoken"),
        n128!("frozen"),
        n128!("ice"),
        &DestroyToken { domain: n128!("frozen"), name: n128!("ice") },
    );
    let err = t.push(vec![destroy], &[&k2], &k2).unwrap_err();
    assert!(matches!(err, ChainError::TokenCannotDestroy(_)));
}

// ── Domain & group updates ───────────────────────────────────────────────────

#[test]
fn updatedomain_swaps_issue_permission() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let k9 = KeyPair::from_seed(b"k9");
    t.push(vec![newdomain_action("upddom", &k1)], &[&k1], &k1).unwrap();

    let upd = Action::new(
        n!("updatedomain"),
        n128!("upddom"),
        n128!(".update"),
        &UpdateDomain {
            name: n128!("upddom"),
            issue: Some(simple_permission("issue", &k9.public_key)),
            transfer: None,
            manage: None,
        },
    );
    t.push(vec![upd], &[&k1], &k1).unwrap();

    let issue = |owner: &KeyPair| {
        Action::new(
            n!("issuetoken"),
            n128!("upddom"),
            n128!(".issue"),
            &IssueToken {
                domain: n128!("upddom"),
                names: vec![n128!("u1")],
                owner: vec![Address::PublicKey(owner.public_key)],
            },
        )
    };
    // The old issuer lost the permission; the new one holds it.
    let err = t.push(vec![issue(&k1)], &[&k1], &k1).unwrap_err();
    assert!(matches!(err, ChainError::UnsatisfiedAuthorization { .. }));
    t.push(vec![issue(&k9)], &[&k9], &k9).unwrap();
}

#[test]
fn updategroup_replaces_tree() {
    let mut t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let k9 = KeyPair::from_seed(b"k9");

    let make_group = |leaves: &[&KeyPair]| Group {
        name: n128!("updgrp"),
        key: Address::PublicKey(k1.public_key),
        root: GroupNode::Branch {
            threshold: 1,
            weight: 0,
            nodes: leaves
                .iter()
                .map(|kp| GroupNode::Leaf { key: kp.public_key, weight: 1 })
                .collect(),
        },
        metas: vec![],
    };

    let newgrp = Action::new(
        n!("newgroup"),
        n128!(".group"),
        n128!("updgrp"),
        &NewGroup { name: n128!("updgrp"), group: make_group(&[&k1]) },
    );
    t.push(vec![newgrp], &[&k1], &k1).unwrap();

    // Only the group key can replace the tree.
    let updgrp = Action::new(
        n!("updategroup"),
        n128!(".group"),
        n128!("updgrp"),
        &UpdateGroup { name: n128!("updgrp"), group: make_group(&[&k1, &k9]) },
    );
    let err = t.push(vec![updgrp.clone()], &[&k9], &k9).unwrap_err();
    assert!(matches!(err, ChainError::UnsatisfiedAuthorization { .. }));
    t.push(vec![updgrp], &[&k1], &k1).unwrap();

    let group: Group = t.read_token(TokenType::Group, None, n128!("updgrp"));
    assert!(group.root.involves_key(&k9.public_key));
}

#[test]
fn updfungible_swaps_issue_permission() {
    let mut t = ChainTester::new();
    let creator = KeyPair::from_seed(b"creator");
    let k9 = KeyPair::from_seed(b"k9");
    let sym = Symbol::new(5, 3);
    t.push(vec![new_fungible_actions(sym, &creator, 1_000_00000)], &[&creator], &creator)
        .unwrap();

    let upd = Action::new(
        n!("updfungible"),
        n128!(".fungible"),
        n128!("3"),
        &UpdFungible {
            sym_id: 3,
            issue: Some(simple_permission("issue", &k9.public_key)),
            transfer: None,
            manage: None,
        },
    );
    t.push(vec![upd], &[&creator], &creator).unwrap();

    let issue = |to: &KeyPair| {
        Action::new(
            n!("issuefungible"),
            n128!(".fungible"),
            n128!("3"),
            &IssueFungible {
                address: Address::PublicKey(to.public_key),
                number: Asset::new(10_00000, sym),
                memo: String::new(),
            },
        )
    };
    // The creator no longer holds issue; the new key does.
    let err = t.push(vec![issue(&creator)], &[&creator], &creator).unwrap_err();
    assert!(matches!(err, ChainError::UnsatisfiedAuthorization { .. }));
    t.push(vec![issue(&k9)], &[&k9], &k9).unwrap();
    assert_eq!(t.balance(&Address::PublicKey(k9.public_key), sym), 10_00000);
}

// ── Fungible recycle / destroy ───────────────────────────────────────────────

#[test]
fn recycleft_and_destroyft_move_supply() {
    let mut t = ChainTester::new();
    let creator = KeyPair::from_seed(b"creator");
    let a = KeyPair::from_seed(b"holder");
    let sym = Symbol::new(5, 7);

    t.push(vec![new_fungible_actions(sym, &creator, 1_000_00000)], &[&creator], &creator)
        .unwrap();
    let issue = Action::new(
        n!("issuefungible"),
        n128!(".fungible"),
        n128!("7"),
        &IssueFungible {
            address: Address::PublicKey(a.public_key),
            number: Asset::new(100_00000, sym),
            memo: String::new(),
        },
    );
    t.push(vec![issue], &[&creator], &creator).unwrap();

    let recycle = Action::new(
        n!("recycleft"),
        n128!(".fungible"),
        n128!("7"),
        &RecycleFt {
            address: Address::PublicKey(a.public_key),
            number: Asset::new(30_00000, sym),
            memo: String::new(),
        },
    );
    t.push(vec![recycle], &[&a], &a).unwrap();
    assert_eq!(t.balance(&Address::PublicKey(a.public_key), sym), 70_00000);
    assert_eq!(t.balance(&fungible_address(7), sym), 930_00000);

    let destroy = Action::new(
        n!("destroyft"),
        n128!(".fungible"),
        n128!("7"),
        &DestroyFt {
            address: Address::PublicKey(a.public_key),
            number: Asset::new(20_00000, sym),
            memo: String::new(),
        },
    );
    t.push(vec![destroy], &[&a], &a).unwrap();
    assert_eq!(t.balance(&Address::PublicKey(a.public_key), sym), 50_00000);
    assert_eq!(t.balance(&Address::Reserved, sym), 20_00000);
}

// ── Producer governance ──────────────────────────────────────────────────────

#[test]
fn prodvote_applies_median_to_config() {
    let mut t = ChainTester::new();
    let producer = t.producer.clone();

    let vote = Action::new(
        n!("prodvote"),
        n128!(".prodvote"),
        n128!("network-charge-factor"),
        &ProdVote {
            producer: n128!("evt"),
            key: n128!("network-charge-factor"),
            value: 77,
        },
    );
    t.push(vec![vote], &[&producer], &producer).unwrap();

    let gpo = t.controller.services.state.global_property().unwrap();
    assert_eq!(gpo.configuration.base_network_charge_factor, 77);
}

#[test]
fn prodvote_rejects_bad_key_and_value() {
    let mut t = ChainTester::new();
    let producer = t.producer.clone();

    let bad_key = Action::new(
        n!("prodvote"),
        n128!(".prodvote"),
        n128!("not-a-factor"),
        &ProdVote { producer: n128!("evt"), key: n128!("not-a-factor"), value: 5 },
    );
    let err = t.push(vec![bad_key], &[&producer], &producer).unwrap_err();
    assert!(matches!(err, ChainError::ProdvoteKey(_)));

    let bad_value = Action::new(
        n!("prodvote"),
        n128!(".prodvote"),
        n128!("cpu-charge-factor"),
        &ProdVote { producer: n128!("evt"), key: n128!("cpu-charge-factor"), value: 1_000_000 },
    );
    let err = t.push(vec![bad_value], &[&producer], &producer).unwrap_err();
    assert!(matches!(err, ChainError::ProdvoteValue(_)));
}

#[test]
fn updsched_promotes_through_pending_to_active() {
    let mut t = ChainTester::new();
    let producer = t.producer.clone();

    // Same signing key under a new producer name; blocks stay signable.
    let upd = Action::new(
        n!("updsched"),
        n128!(".prodsched"),
        n128!(".update"),
        &UpdSched {
            producers: ProducerSchedule {
                version: 0,
                producers: vec![ProducerKey {
                    producer_name: n128!("evt2"),
                    block_signing_key: producer.public_key,
                }],
            },
        },
    );
    t.push(vec![upd], &[&producer], &producer).unwrap();

    let gpo = t.controller.services.state.global_property().unwrap();
    assert!(gpo.proposed_schedule.is_some());

    // Proposed becomes pending once its block is irreversible, and active
    // one irreversibility step later.
    for _ in 0..4 {
        t.produce_empty_block();
    }
    let head = t.controller.head_state();
    assert_eq!(head.active_schedule.version, 1);
    assert_eq!(head.active_schedule.producers[0].producer_name, n128!("evt2"));
    assert_eq!(head.header.producer, n128!("evt2"));
}

#[test]
fn blackaddr_records_addresses() {
    let mut t = ChainTester::new();
    let producer = t.producer.clone();
    let bad = KeyPair::from_seed(b"bad-actor");

    let black = Action::new(
        n!("blackaddr"),
        n128!(".blackaddr"),
        n128!(".update"),
        &BlackAddr { addrs: vec![Address::PublicKey(bad.public_key)] },
    );
    t.push(vec![black], &[&producer], &producer).unwrap();

    let list = t.controller.services.state.blacklist().unwrap();
    assert_eq!(list, vec![Address::PublicKey(bad.public_key)]);

    // Non-producers cannot blacklist.
    let outsider = KeyPair::from_seed(b"outsider");
    let black2 = Action::new(
        n!("blackaddr"),
        n128!(".blackaddr"),
        n128!(".update"),
        &BlackAddr { addrs: vec![Address::PublicKey(outsider.public_key)] },
    );
    let err = t.push(vec![black2], &[&outsider], &outsider).unwrap_err();
    assert!(matches!(err, ChainError::UnsatisfiedAuthorization { .. }));
}

// ── Scripts ──────────────────────────────────────────────────────────────────

#[test]
fn scripts_create_and_update_under_creator_authority() {
    let mut t = ChainTester::new();
    let ks = KeyPair::from_seed(b"scripter");
    let outsider = KeyPair::from_seed(b"outsider");

    let create = Action::new(
        n!("newscript"),
        n128!(".script"),
        n128!("script1"),
        &NewScript { name: n128!("script1"), content: "fn main() {}".into(), creator: ks.public_key },
    );
    t.push(vec![create], &[&ks], &ks).unwrap();

    let upd = Action::new(
        n!("updscript"),
        n128!(".script"),
        n128!("script1"),
        &UpdScript { name: n128!("script1"), content: "fn main() { run() }".into() },
    );
    let err = t.push(vec![upd.clone()], &[&outsider], &outsider).unwrap_err();
    assert!(matches!(err, ChainError::UnsatisfiedAuthorization { .. }));
    t.push(vec![upd], &[&ks], &ks).unwrap();

    let script: ScriptDef = t.read_token(TokenType::Script, None, n128!("script1"));
    assert_eq!(script.content, "fn main() { run() }");
    assert_eq!(script.creator, ks.public_key);
}

// ── Fixed stakes & validator withdrawals ─────────────────────────────────────

#[test]
fn fixed_stake_matures_into_active_units() {
    let mut t = ChainTester::new();
    let producer = t.producer.clone();
    let kv = KeyPair::from_seed(b"validator-key");
    let staker = KeyPair::from_seed(b"staker");
    t.fund_evt(&staker, 1_000_000_00000);

    let pool = Action::new(
        n!("updstakepool"),
        n128!(".staking"),
        n128!("1"),
        &UpdStakepool {
            sym_id: 1,
            purchase_threshold: Some(Asset::new(5_00000, evt_sym())),
            demand_r: None,
            demand_t: None,
            demand_q: None,
            demand_w: None,
            fixed_r: Some(20_000),
            fixed_t: Some(1),
        },
    );
    t.push(vec![pool], &[&producer], &producer).unwrap();

    let newv = Action::new(
        n!("newvalidator"),
        n128!(".staking"),
        n128!("fixedval"),
        &NewValidator {
            name: n128!("fixedval"),
            creator: kv.public_key,
            signer: kv.public_key,
            withdraw: simple_permission("withdraw", &kv.public_key),
            manage: simple_permission("manage", &kv.public_key),
            commission: "0.5".parse().unwrap(),
        },
    );
    t.push(vec![newv], &[&kv], &kv).unwrap();

    let stake = Action::new(
        n!("staketkns"),
        n128!(".staking"),
        n128!("fixedval"),
        &StakeTkns {
            staker: staker.public_key,
            validator: n128!("fixedval"),
            amount: Asset::new(100_000_00000, evt_sym()),
            type_: StakeType::Fixed,
            fixed_days: 30,
        },
    );
    t.push(vec![stake], &[&staker], &staker).unwrap();

    let convert = Action::new(
        n!("toactivetkns"),
        n128!(".staking"),
        n128!("fixedval"),
        &ToActiveTkns { staker: staker.public_key, validator: n128!("fixedval"), sym_id: 1 },
    );
    // Not matured yet.
    let err = t.push(vec![convert.clone()], &[&staker], &staker).unwrap_err();
    assert!(matches!(err, ChainError::StakingShares));

    t.produce_block_days_later(31);
    t.push(vec![convert], &[&staker], &staker).unwrap();

    // 30 days at the 0.2 yearly fixed rate mints the maturity bonus.
    let validator: ValidatorDef = t.read_token(TokenType::Validator, None, n128!("fixedval"));
    let bonus = 100_000i64 * 20_000 * 30 / (100_000 * 365);
    assert_eq!(validator.total_units, 100_000 + bonus);
}

#[test]
fn newstakepool_rejects_duplicate_of_genesis_pool() {
    let mut t = ChainTester::new();
    let producer = t.producer.clone();

    // The EVT pool already exists from genesis.
    let dup = Action::new(
        n!("newstakepool"),
        n128!(".staking"),
        n128!("1"),
        &NewStakepool {
            sym_id: 1,
            purchase_threshold: Asset::new(5_00000, evt_sym()),
            demand_r: 0,
            demand_t: 1,
            demand_q: 1,
            demand_w: 0,
            fixed_r: 0,
            fixed_t: 0,
        },
    );
    let err = t.push(vec![dup], &[&producer], &producer).unwrap_err();
    assert!(matches!(err, ChainError::StakepoolDuplicate(1)));

    // Pools for other symbols are creatable.
    let other = Action::new(
        n!("newstakepool"),
        n128!(".staking"),
        n128!("7"),
        &NewStakepool {
            sym_id: 7,
            purchase_threshold: Asset::new(1_00000, Symbol::new(5, 7)),
            demand_r: 0,
            demand_t: 1,
            demand_q: 1,
            demand_w: 0,
            fixed_r: 0,
            fixed_t: 0,
        },
    );
    t.push(vec![other], &[&producer], &producer).unwrap();
    assert!(t
        .controller
        .services
        .cache
        .exists_token(TokenType::Stakepool, None, n128!("7"))
        .unwrap());
}

#[test]
fn valiwithdraw_moves_commission_under_withdraw_authority() {
    let mut t = ChainTester::new();
    let kv = KeyPair::from_seed(b"validator-key");
    let outsider = KeyPair::from_seed(b"outsider");

    let newv = Action::new(
        n!("newvalidator"),
        n128!(".staking"),
        n128!("wdval"),
        &NewValidator {
            name: n128!("wdval"),
            creator: kv.public_key,
            signer: kv.public_key,
            withdraw: simple_permission("withdraw", &kv.public_key),
            manage: simple_permission("manage", &kv.public_key),
            commission: "0.5".parse().unwrap(),
        },
    );
    t.push(vec![newv], &[&kv], &kv).unwrap();

    // Accrued commission sits at the validator's generated address.
    t.seed_evt_addr(&validator_address(n128!("wdval"), 1), 50_00000);

    let withdraw = Action::new(
        n!("valiwithdraw"),
        n128!(".staking"),
        n128!("wdval"),
        &ValiWithdraw {
            name: n128!("wdval"),
            addr: Address::PublicKey(kv.public_key),
            amount: Asset::new(10_00000, evt_sym()),
        },
    );
    let err = t.push(vec![withdraw.clone()], &[&outsider], &outsider).unwrap_err();
    assert!(matches!(err, ChainError::UnsatisfiedAuthorization { .. }));
    t.push(vec![withdraw], &[&kv], &kv).unwrap();

    assert_eq!(t.balance(&Address::PublicKey(kv.public_key), evt_sym()), 10_00000);
    assert_eq!(t.balance(&validator_address(n128!("wdval"), 1), evt_sym()), 40_00000);
}

#[test]
fn get_required_keys_reports_used_subset() {
    let t = ChainTester::new();
    let k1 = KeyPair::from_seed(b"k1");
    let unrelated = KeyPair::from_seed(b"unrelated");

    let action = newdomain_action("keysdom", &k1);
    let mut candidates = BTreeSet::new();
    candidates.insert(k1.public_key);
    candidates.insert(unrelated.public_key);

    let used = jmzk_chain::authorizer::get_required_keys(
        &t.controller.services,
        &candidates,
        &[action],
        &t.controller.head_state().active_schedule,
        6,
    )
    .unwrap();
    assert!(used.contains(&k1.public_key));
    assert!(!used.contains(&unrelated.public_key));
}
