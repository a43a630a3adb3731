//! End-to-end ledger scenarios: mining, admission, forks and replay.

use forgeledger::blockchain::{AdmitOutcome, Block, Blockchain, ConsensusParams};
use forgeledger::error::ChainError;
use forgeledger::miner::{build_template, meets_difficulty, mine_block};
use forgeledger::transaction::Transaction;
use std::collections::HashSet;

fn params() -> ConsensusParams {
    ConsensusParams {
        difficulty: 1,
        block_reward: 50,
        verify_signatures: false,
        gas_limit: 100_000,
    }
}

fn funded_chain() -> Blockchain {
    let mut chain = Blockchain::new(params()).expect("genesis");
    chain.credit_account("alice", 100).expect("credit");
    chain
}

fn mine_next(chain: &Blockchain, transactions: Vec<Transaction>) -> Block {
    let tip = chain.tip();
    let block = Block::new(tip.height + 1, tip.hash, transactions, tip.timestamp + 1);
    mine_block(block, chain.params.difficulty, chain.mined_nonces())
}

#[test]
fn test_every_block_meets_difficulty_and_hash() {
    let mut chain = funded_chain();
    for i in 0..4u64 {
        let template = build_template(
            &chain,
            &[Transaction::transfer("alice", "bob", 10, i + 1)],
            "miner",
            10,
            chain.tip().timestamp + 1,
        )
        .expect("template");
        let block = mine_block(template, 1, chain.mined_nonces());
        chain.admit_block(block).expect("admit");
    }

    assert_eq!(chain.len(), 5);
    for block in chain.blocks() {
        assert_eq!(block.hash, block.calculate_hash());
        assert!(meets_difficulty(&block.hash, chain.params.difficulty));
    }
    assert_eq!(chain.balance("alice"), 60);
    assert_eq!(chain.balance("bob"), 40);
    assert_eq!(chain.balance("miner"), 200);
}

#[test]
fn test_balances_never_go_negative() {
    let mut chain = funded_chain();
    let overdraft = mine_next(&chain, vec![Transaction::transfer("alice", "bob", 101, 1)]);
    let err = chain.admit_block(overdraft).unwrap_err();
    assert!(err.to_string().contains("Insufficient balance"));

    let ghost = mine_next(&chain, vec![Transaction::transfer("nobody", "bob", 1, 1)]);
    assert!(chain.admit_block(ghost).is_err());

    assert_eq!(chain.len(), 1);
    assert_eq!(chain.balance("alice"), 100);
    assert_eq!(chain.balance("bob"), 0);
}

#[test]
fn test_second_spend_in_same_block_fails() {
    let mut chain = funded_chain();
    let block = mine_next(
        &chain,
        vec![
            Transaction::transfer("alice", "bob", 60, 1),
            Transaction::transfer("alice", "carol", 60, 2),
        ],
    );
    assert!(chain.admit_block(block).is_err());
    assert_eq!(chain.balance("alice"), 100);

    // The miner's template keeps the first spend and drops the second.
    let template = build_template(
        &chain,
        &[
            Transaction::transfer("alice", "bob", 60, 1),
            Transaction::transfer("alice", "carol", 60, 2),
        ],
        "miner",
        10,
        chain.tip().timestamp + 1,
    )
    .expect("template");
    assert_eq!(template.transactions.len(), 2);
    assert!(template.transactions[0].is_coinbase());

    let block = mine_block(template, 1, chain.mined_nonces());
    chain.admit_block(block).expect("admit");
    assert_eq!(chain.balance("alice"), 40);
    assert_eq!(chain.balance("bob"), 60);
    assert_eq!(chain.balance("carol"), 0);
}

#[test]
fn test_readmitting_a_block_changes_nothing() {
    let mut chain = funded_chain();
    let block = mine_next(&chain, vec![Transaction::transfer("alice", "bob", 30, 1)]);
    chain.admit_block(block.clone()).expect("admit");
    let before = chain.state().accounts.clone();

    assert_eq!(
        chain.admit_block(block).unwrap_err(),
        ChainError::BlockAlreadyExists
    );
    assert_eq!(chain.state().accounts, before);
    assert_eq!(chain.len(), 2);
}

#[test]
fn test_nonces_are_never_reused() {
    let mut chain = funded_chain();
    for _ in 0..6 {
        let block = mine_next(&chain, vec![]);
        chain.admit_block(block).expect("admit");
    }
    let nonces: HashSet<u64> = chain.blocks().iter().map(|b| b.nonce).collect();
    assert_eq!(nonces.len(), chain.len());
    assert_eq!(chain.mined_nonces(), &nonces);
}

#[test]
fn test_taller_fork_replaces_tip() {
    let mut chain = funded_chain();
    for _ in 0..3 {
        let block = mine_next(&chain, vec![]);
        chain.admit_block(block).expect("admit");
    }

    let sibling = mine_block(Block::new(3, [7u8; 32], vec![], 99), 1, chain.mined_nonces());
    let err = chain.admit_block(sibling).unwrap_err();
    assert_eq!(err.reason_code(), "consensus_error");
    assert_eq!(chain.height(), 3);

    let taller = mine_block(Block::new(4, [7u8; 32], vec![], 100), 1, chain.mined_nonces());
    let outcome = chain.admit_block(taller).expect("fork");
    assert_eq!(
        outcome,
        AdmitOutcome::ForkAdopted {
            height: 4,
            replaced_tip_height: 3
        }
    );
    assert_eq!(chain.height(), 4);
}

#[test]
fn test_tampered_block_is_rejected_without_side_effects() {
    let mut chain = funded_chain();
    let mut block = mine_next(&chain, vec![Transaction::transfer("alice", "bob", 10, 1)]);
    block.hash[0] ^= 0xFF;

    let err = chain.admit_block(block).unwrap_err();
    assert!(err.to_string().contains("Block hash mismatch"));
    assert_eq!(chain.len(), 1);
    assert_eq!(chain.balance("bob"), 0);
}

#[test]
fn test_block_json_survives_the_wire() {
    let mut chain = funded_chain();
    let block = mine_next(&chain, vec![Transaction::transfer("alice", "bob", 10, 1)]);
    let json = serde_json::to_value(&block).expect("encode");
    let decoded = Block::from_json(json).expect("decode");
    assert_eq!(decoded.calculate_hash(), block.hash);
    chain.admit_block(decoded).expect("admit");
    assert_eq!(chain.balance("bob"), 10);
}
