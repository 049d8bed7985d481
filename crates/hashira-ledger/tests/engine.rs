//! end-to-end engine behavior: append/commit/rollback, queries, reopen

use hashira_ledger::{
    chain, Account, Asset, AssetId, Command, Engine, IndexKind, InvalidReason, LedgerConfig,
    LedgerError, Peer, Signature, Transaction, EMPTY_ROOT,
};

fn open(dir: &tempfile::TempDir) -> Engine {
    Engine::new(LedgerConfig::new(dir.path().join("ledger"))).unwrap()
}

fn blob(creator: &str, command: Command) -> Vec<u8> {
    Transaction::build(
        creator,
        command,
        vec![Signature {
            pubkey: creator.to_string(),
            signature: vec![0x5A; 64],
        }],
        None,
    )
    .encode()
    .unwrap()
}

fn account_add(pubkey: &str) -> Command {
    Command::AccountAdd {
        account: Account {
            pubkey: pubkey.to_string(),
            alias: pubkey.to_lowercase(),
            signatories: vec![pubkey.to_string()],
            use_keys: 1,
        },
    }
}

fn usd() -> AssetId {
    AssetId::new("l1", "d1", "USD")
}

#[test]
fn empty_start() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(&dir);
    assert_eq!(engine.merkle_root(), EMPTY_ROOT);
    assert_eq!(engine.tx_total(), 0);
}

#[test]
fn single_account_create() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(&dir);

    let blob = blob("A", account_add("A"));
    let tx_hash = Transaction::decode(&blob).unwrap().hash;
    let root = engine.append(&blob).unwrap();
    assert_eq!(root, chain(&EMPTY_ROOT, &tx_hash));

    engine.commit().unwrap();

    let records = engine
        .get_by_key(IndexKind::AccountAdd, "A", false)
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0], blob);
    assert_eq!(engine.merkle_root(), chain(&EMPTY_ROOT, &tx_hash));
    assert_eq!(engine.tx_total(), 1);

    let account = engine.get_account("A", false).unwrap().unwrap();
    assert_eq!(account.alias, "a");
    assert_eq!(account.use_keys, 1);
}

#[test]
fn asset_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(&dir);

    engine
        .append(&blob(
            "A",
            Command::AssetCreate {
                asset: Asset::currency(usd(), 100, 2),
            },
        ))
        .unwrap();
    engine.append(&blob("A", account_add("A"))).unwrap();
    engine.append(&blob("A", account_add("B"))).unwrap();
    engine
        .append(&blob(
            "A",
            Command::AssetAdd {
                pubkey: "A".into(),
                asset: Asset::currency(usd(), 200, 2),
            },
        ))
        .unwrap();

    // visible through the live write transaction before commit
    let held = engine
        .account_get_asset("A", &usd(), true)
        .unwrap()
        .unwrap();
    assert_eq!(held.amount(), Some(200));

    engine
        .append(&blob(
            "A",
            Command::AssetTransfer {
                sender: "A".into(),
                receiver: "B".into(),
                asset: Asset::currency(usd(), 100, 2),
            },
        ))
        .unwrap();
    engine.commit().unwrap();

    let sender = engine
        .account_get_asset("A", &usd(), false)
        .unwrap()
        .unwrap();
    let receiver = engine
        .account_get_asset("B", &usd(), false)
        .unwrap()
        .unwrap();
    assert_eq!(sender.amount(), Some(100));
    assert_eq!(receiver.amount(), Some(100));

    let schema = engine.asset_get_schema(&usd(), false).unwrap().unwrap();
    assert_eq!(schema.amount(), Some(100));

    let all = engine.account_get_all_assets("A", false).unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn transfer_drains_sender_row() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(&dir);
    engine
        .append(&blob(
            "A",
            Command::AssetAdd {
                pubkey: "A".into(),
                asset: Asset::currency(usd(), 50, 2),
            },
        ))
        .unwrap();
    engine
        .append(&blob(
            "A",
            Command::AssetTransfer {
                sender: "A".into(),
                receiver: "B".into(),
                asset: Asset::currency(usd(), 50, 2),
            },
        ))
        .unwrap();
    engine.commit().unwrap();

    // drained to zero: the row disappears
    assert!(engine.account_get_asset("A", &usd(), false).unwrap().is_none());
    assert_eq!(
        engine
            .account_get_asset("B", &usd(), false)
            .unwrap()
            .unwrap()
            .amount(),
        Some(50)
    );
}

#[test]
fn rollback_visibility() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(&dir);

    engine.append(&blob("A", account_add("A"))).unwrap();
    engine.commit().unwrap();
    let committed_root = engine.merkle_root();

    engine.append(&blob("A", account_add("B"))).unwrap();
    assert_eq!(engine.tx_total(), 2);

    // a committed-state snapshot must not see the uncommitted append
    assert!(engine.get_account("B", false).unwrap().is_none());
    assert!(engine.get_account("B", true).unwrap().is_some());

    engine.rollback().unwrap();
    assert!(engine.get_account("B", false).unwrap().is_none());
    assert!(engine.get_account("B", true).unwrap().is_none());
    assert_eq!(engine.merkle_root(), committed_root);
    assert_eq!(engine.tx_total(), 1);

    // the engine keeps working after the rollback
    engine.append(&blob("A", account_add("C"))).unwrap();
    engine.commit().unwrap();
    assert_eq!(engine.tx_total(), 2);
    assert!(engine.get_account("C", false).unwrap().is_some());
}

#[test]
fn failed_append_discards_uncommitted_work() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(&dir);

    engine.append(&blob("A", account_add("A"))).unwrap();
    engine.commit().unwrap();
    let committed_root = engine.merkle_root();

    engine.append(&blob("A", account_add("B"))).unwrap();
    // duplicate account: refused, and the pending AccountAdd("B") goes too
    let err = engine.append(&blob("A", account_add("A"))).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidTransaction(InvalidReason::Duplicate(_))
    ));

    assert_eq!(engine.merkle_root(), committed_root);
    assert_eq!(engine.tx_total(), 1);
    assert!(engine.get_account("B", true).unwrap().is_none());
}

#[test]
fn insufficient_funds_and_precision_checks() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(&dir);
    engine
        .append(&blob(
            "A",
            Command::AssetAdd {
                pubkey: "A".into(),
                asset: Asset::currency(usd(), 100, 2),
            },
        ))
        .unwrap();
    engine.commit().unwrap();

    let err = engine
        .append(&blob(
            "A",
            Command::AssetRemove {
                pubkey: "A".into(),
                asset: Asset::currency(usd(), 150, 2),
            },
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidTransaction(InvalidReason::InsufficientFunds(_))
    ));

    let err = engine
        .append(&blob(
            "A",
            Command::AssetAdd {
                pubkey: "A".into(),
                asset: Asset::currency(usd(), 1, 4),
            },
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidTransaction(InvalidReason::PrecisionMismatch(_))
    ));

    // committed balance untouched by the refused appends
    assert_eq!(
        engine
            .account_get_asset("A", &usd(), false)
            .unwrap()
            .unwrap()
            .amount(),
        Some(100)
    );
}

#[test]
fn index_intersection() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(&dir);

    for receiver in ["B", "C", "D"] {
        engine
            .append(&blob(
                "A",
                Command::AssetTransfer {
                    sender: "A".into(),
                    receiver: receiver.into(),
                    asset: Asset::currency(usd(), 1, 2),
                },
            ))
            .unwrap_err(); // no balance yet: refused
    }
    // fund the participants first, then run the transfers
    for holder in ["A", "B"] {
        engine
            .append(&blob(
                "A",
                Command::AssetAdd {
                    pubkey: holder.into(),
                    asset: Asset::currency(usd(), 100, 2),
                },
            ))
            .unwrap();
    }
    for receiver in ["B", "C", "D"] {
        engine
            .append(&blob(
                "A",
                Command::AssetTransfer {
                    sender: "A".into(),
                    receiver: receiver.into(),
                    asset: Asset::currency(usd(), 10, 2),
                },
            ))
            .unwrap();
    }
    engine
        .append(&blob(
            "B",
            Command::AssetTransfer {
                sender: "B".into(),
                receiver: "A".into(),
                asset: Asset::currency(usd(), 5, 2),
            },
        ))
        .unwrap();
    engine.commit().unwrap();

    let sent = engine
        .get_tx_indexes(IndexKind::TransferSender, "A", false)
        .unwrap();
    let received = engine
        .get_tx_indexes(IndexKind::TransferReceiver, "A", false)
        .unwrap();
    assert_eq!(sent.len(), 3);
    assert_eq!(received.len(), 1);
    assert!(sent.iter().all(|i| !received.contains(i)));

    // ascending TxIndex order
    let mut sorted = sent.clone();
    sorted.sort_unstable();
    assert_eq!(sent, sorted);

    let blobs = engine
        .get_asset_transfer_by_sender("A", false)
        .unwrap();
    assert_eq!(blobs.len(), 3);
    for raw in &blobs {
        let tx = Transaction::decode(raw).unwrap();
        assert!(matches!(tx.command, Command::AssetTransfer { .. }));
    }
}

#[test]
fn crash_replay_equivalence() {
    let dir = tempfile::tempdir().unwrap();
    let mut roots = Vec::new();
    {
        let mut engine = open(&dir);
        for i in 0..20u32 {
            engine
                .append(&blob("A", account_add(&format!("acct-{i}"))))
                .unwrap();
            if i % 4 == 3 {
                engine.commit().unwrap();
                roots.push(engine.merkle_root());
            }
        }
        engine.commit().unwrap();
        roots.push(engine.merkle_root());
        engine.close();
    }

    let engine = open(&dir);
    assert_eq!(engine.tx_total(), 20);
    assert_eq!(engine.merkle_root(), *roots.last().unwrap());
    assert!(engine.get_account("acct-19", false).unwrap().is_some());
}

#[test]
fn replaying_the_log_reproduces_the_state() {
    let source_dir = tempfile::tempdir().unwrap();
    let replica_dir = tempfile::tempdir().unwrap();
    let mut source = open(&source_dir);

    source.append(&blob("A", account_add("A"))).unwrap();
    source.append(&blob("A", account_add("B"))).unwrap();
    source
        .append(&blob(
            "A",
            Command::AssetAdd {
                pubkey: "A".into(),
                asset: Asset::currency(usd(), 500, 2),
            },
        ))
        .unwrap();
    source
        .append(&blob(
            "A",
            Command::AssetTransfer {
                sender: "A".into(),
                receiver: "B".into(),
                asset: Asset::currency(usd(), 123, 2),
            },
        ))
        .unwrap();
    source.commit().unwrap();

    let mut replica = Engine::new(LedgerConfig::new(replica_dir.path().join("ledger"))).unwrap();
    for index in 1..=source.tx_total() {
        let raw = source.get_blob(index, false).unwrap().unwrap();
        replica.append(&raw).unwrap();
    }
    replica.commit().unwrap();

    assert_eq!(replica.merkle_root(), source.merkle_root());
    assert_eq!(replica.tx_total(), source.tx_total());
    for pubkey in ["A", "B"] {
        assert_eq!(
            replica.account_get_all_assets(pubkey, false).unwrap(),
            source.account_get_all_assets(pubkey, false).unwrap()
        );
        assert_eq!(
            replica.get_account(pubkey, false).unwrap(),
            source.get_account(pubkey, false).unwrap()
        );
    }
}

#[test]
fn peer_lifecycle_and_trust_clamp() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(&dir);

    engine
        .append(&blob(
            "A",
            Command::PeerAdd {
                peer: Peer {
                    ledger: "l1".into(),
                    pubkey: "P".into(),
                    address: "10.0.0.1:50051".into(),
                    trust: 1.0,
                    active: true,
                },
            },
        ))
        .unwrap();
    engine
        .append(&blob(
            "A",
            Command::PeerChangeTrust {
                pubkey: "P".into(),
                delta: 100.0,
            },
        ))
        .unwrap();
    engine
        .append(&blob(
            "A",
            Command::PeerSetActive {
                pubkey: "P".into(),
                active: false,
            },
        ))
        .unwrap();
    engine.commit().unwrap();

    let peer = engine.pubkey_get_peer("P", false).unwrap().unwrap();
    assert_eq!(peer.trust, 10.0); // clamped to the configured limit
    assert!(!peer.active);

    let err = engine
        .append(&blob(
            "A",
            Command::PeerRemove {
                pubkey: "unknown".into(),
            },
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidTransaction(InvalidReason::Missing(_))
    ));
}

#[test]
fn signatories_are_a_set() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(&dir);
    engine.append(&blob("A", account_add("A"))).unwrap();
    engine
        .append(&blob(
            "A",
            Command::AccountAddSignatory {
                pubkey: "A".into(),
                signatories: vec!["K1".into(), "K2".into()],
            },
        ))
        .unwrap();
    engine.commit().unwrap();

    let err = engine
        .append(&blob(
            "A",
            Command::AccountAddSignatory {
                pubkey: "A".into(),
                signatories: vec!["K1".into()],
            },
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidTransaction(InvalidReason::Duplicate(_))
    ));

    engine
        .append(&blob(
            "A",
            Command::AccountRemoveSignatory {
                pubkey: "A".into(),
                signatories: vec!["K2".into()],
            },
        ))
        .unwrap();
    engine.commit().unwrap();

    let account = engine.get_account("A", false).unwrap().unwrap();
    assert_eq!(account.signatories, vec!["A", "K1"]);
}

#[test]
fn permission_rows_add_and_remove() {
    use hashira_ledger::model::{AssetPermission, LedgerPermission};
    use hashira_ledger::Permission;

    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(&dir);

    let ledger_perm = Permission::Ledger(LedgerPermission {
        ledger: "l1".into(),
        domain_add: true,
        domain_remove: false,
        peer_add: true,
        peer_remove: false,
    });
    let asset_perm = Permission::Asset(AssetPermission {
        asset: "USD".into(),
        add: true,
        remove: true,
        transfer: true,
    });
    engine
        .append(&blob(
            "A",
            Command::PermissionAdd {
                pubkey: "A".into(),
                permission: ledger_perm.clone(),
            },
        ))
        .unwrap();
    engine
        .append(&blob(
            "A",
            Command::PermissionAdd {
                pubkey: "A".into(),
                permission: asset_perm.clone(),
            },
        ))
        .unwrap();
    engine.commit().unwrap();

    let perms = engine.get_permissions("A", false).unwrap();
    assert_eq!(perms.len(), 2);
    assert!(perms.contains(&ledger_perm));
    assert!(perms.contains(&asset_perm));

    engine
        .append(&blob(
            "A",
            Command::PermissionRemove {
                pubkey: "A".into(),
                permission: asset_perm.clone(),
            },
        ))
        .unwrap();
    engine.commit().unwrap();
    assert_eq!(engine.get_permissions("A", false).unwrap(), vec![ledger_perm]);

    let err = engine
        .append(&blob(
            "A",
            Command::PermissionRemove {
                pubkey: "A".into(),
                permission: asset_perm,
            },
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidTransaction(InvalidReason::Missing(_))
    ));
}

#[test]
fn chaincode_commands_log_without_state_effect() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(&dir);
    let code = hashira_ledger::Chaincode {
        ledger: "l1".into(),
        domain: "d1".into(),
        name: "settle".into(),
        code: vec![0u8; 16],
    };
    engine
        .append(&blob("A", Command::ChaincodeAdd { code: code.clone() }))
        .unwrap();
    engine
        .append(&blob(
            "A",
            Command::ChaincodeExecute {
                ledger: "l1".into(),
                domain: "d1".into(),
                name: "settle".into(),
            },
        ))
        .unwrap();
    engine.commit().unwrap();

    // logged and merkled, but no index category and no state change
    assert_eq!(engine.tx_total(), 2);
    assert!(engine.get_transaction(1, false).unwrap().is_some());
    let stat = engine.stat();
    assert!(stat.entries >= 2);
}

#[test]
fn bad_hash_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(&dir);

    let mut tx = Transaction::build("A", account_add("A"), Vec::new(), None);
    tx.hash = [7u8; 32];
    let err = engine.append(&tx.encode().unwrap()).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidTransaction(InvalidReason::BadHash)
    ));

    let err = engine.append(b"\x99\x99not a transaction").unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidTransaction(InvalidReason::Malformed(_))
    ));
    assert_eq!(engine.tx_total(), 0);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        /// The root returned by every append equals the chained fold of the
        /// transaction hashes, and committed blobs read back byte-exact.
        #[test]
        fn append_roots_fold_and_log_round_trips(count in 1usize..24) {
            let dir = tempfile::tempdir().unwrap();
            let mut engine = open(&dir);
            let mut expected = EMPTY_ROOT;
            let mut blobs = Vec::new();
            for i in 0..count {
                let raw = blob("A", account_add(&format!("acct-{i}")));
                let tx_hash = Transaction::decode(&raw).unwrap().hash;
                let root = engine.append(&raw).unwrap();
                expected = chain(&expected, &tx_hash);
                prop_assert_eq!(root, expected);
                blobs.push(raw);
            }
            engine.commit().unwrap();
            for (i, raw) in blobs.iter().enumerate() {
                let stored = engine.get_blob(i as u64 + 1, false).unwrap().unwrap();
                prop_assert_eq!(&stored, raw);
            }
        }

        /// Every index entry references a stored transaction of the right
        /// category, keyed by its creator.
        #[test]
        fn index_consistency(count in 1usize..16) {
            let dir = tempfile::tempdir().unwrap();
            let mut engine = open(&dir);
            for i in 0..count {
                let creator = format!("creator-{}", i % 3);
                engine
                    .append(&blob(&creator, account_add(&format!("acct-{i}"))))
                    .unwrap();
            }
            engine.commit().unwrap();

            let mut seen = 0usize;
            for creator_id in 0..3 {
                let creator = format!("creator-{creator_id}");
                let indexes = engine
                    .get_tx_indexes(IndexKind::AccountAdd, &creator, false)
                    .unwrap();
                for index in indexes {
                    let tx = engine.get_transaction(index, false).unwrap().unwrap();
                    prop_assert_eq!(&tx.creator, &creator);
                    let is_account_add = matches!(tx.command, Command::AccountAdd { .. });
                    prop_assert!(is_account_add);
                    seen += 1;
                }
            }
            prop_assert_eq!(seen, count);
        }

        /// Rollback after any number of uncommitted appends restores the
        /// observable state of the last commit.
        #[test]
        fn rollback_atomicity(committed in 0usize..6, pending in 1usize..12) {
            let dir = tempfile::tempdir().unwrap();
            let mut engine = open(&dir);
            for i in 0..committed {
                engine
                    .append(&blob("A", account_add(&format!("keep-{i}"))))
                    .unwrap();
            }
            engine.commit().unwrap();
            let root = engine.merkle_root();
            let height = engine.tx_total();

            for i in 0..pending {
                engine
                    .append(&blob("A", account_add(&format!("drop-{i}"))))
                    .unwrap();
            }
            engine.rollback().unwrap();

            prop_assert_eq!(engine.merkle_root(), root);
            prop_assert_eq!(engine.tx_total(), height);
            for i in 0..pending {
                let dropped = engine
                    .get_account(&format!("drop-{i}"), true)
                    .unwrap()
                    .is_none();
                prop_assert!(dropped);
            }
            // and the engine still appends cleanly afterwards
            engine.append(&blob("A", account_add("after"))).unwrap();
            engine.commit().unwrap();
            prop_assert_eq!(engine.tx_total(), height + 1);
        }
    }
}
