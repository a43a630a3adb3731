//! Transaction module split into types and validation for better modularity

pub mod types;
pub mod validation;

pub use types::*;
pub use validation::Execution;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::LedgerState;
    use crate::contract::{samples, Value};
    use crate::crypto::KeyPair;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn funded_state(address: &str, balance: u64) -> LedgerState {
        let mut state = LedgerState::new(100_000);
        state.accounts.credit(address, balance).unwrap();
        state
    }

    #[test]
    fn test_missing_type_defaults_to_transfer() {
        let tx = Transaction::from_json(json!({
            "timestamp": 1, "from": "alice", "to": "bob", "value": 5, "signature": "sig"
        }))
        .unwrap();
        assert_eq!(tx.type_name(), TRANSFER);
        assert_eq!(
            tx.payload,
            Payload::Transfer {
                to: "bob".into(),
                value: 5
            }
        );
    }

    #[test]
    fn test_missing_fields_are_structural() {
        let err = Transaction::from_json(json!({
            "type": "call_contract", "timestamp": 1, "from": "alice", "signature": "sig"
        }))
        .unwrap_err();
        assert_eq!(err.reason_code(), "structural_error");
        assert!(err.to_string().contains("contract_id, function"));

        let err = Transaction::from_json(json!({"type": "mint", "timestamp": 1})).unwrap_err();
        assert!(err.to_string().contains("Unknown transaction type"));

        let err = Transaction::from_json(json!({
            "timestamp": 1, "from": "a", "to": "b", "value": -5, "signature": "s"
        }))
        .unwrap_err();
        assert_eq!(err.reason_code(), "structural_error");
    }

    #[test]
    fn test_wire_form_is_flat() {
        let mut args = BTreeMap::new();
        args.insert("amount".to_string(), Value::Int(100));
        let tx = Transaction::call("alice", "abcd", "deposit", args, 7);
        assert_eq!(
            tx.to_json(),
            json!({
                "type": "call_contract",
                "timestamp": 7,
                "from": "alice",
                "signature": "",
                "contract_id": "abcd",
                "function": "deposit",
                "args": {"amount": 100},
            })
        );
        let parsed: Transaction = serde_json::from_value(tx.to_json()).unwrap();
        assert_eq!(parsed, tx);
    }

    #[test]
    fn test_match_keys() {
        let a = Transaction::transfer("alice", "bob", 5, 1);
        let b = Transaction::transfer("alice", "bob", 5, 2);
        let c = Transaction::transfer("alice", "bob", 6, 1);
        assert_eq!(a.match_key(), b.match_key());
        assert_ne!(a.match_key(), c.match_key());
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_ignores_pre_execution_output() {
        let tx = Transaction::deploy("alice", samples::TRANSFER_CONTRACT, 1);
        let executed = tx.with_execution(Execution {
            result: Some(TxResult {
                output: Value::from("Success"),
                state_changes: BTreeMap::new(),
            }),
            contract_id: Some("0123456789abcdef".into()),
        });
        assert_eq!(tx.hash(), executed.hash());
        assert_ne!(tx, executed);
    }

    #[test]
    fn test_oversized_transaction_rejected() {
        let code = format!("fn f() {{ return \"{}\"; }}", "x".repeat(MAX_TRANSACTION_SIZE));
        let tx = Transaction::deploy("alice", &code, 1);
        let err = tx.validate_structure(false).unwrap_err();
        assert!(err.to_string().contains("Transaction too large"));
    }

    #[test]
    fn test_signature_verification() {
        let keypair = KeyPair::generate();
        let mut tx = Transaction::transfer(&keypair.address(), "bob", 5, 1);
        assert!(tx.validate_structure(true).is_err());

        tx.sign(&keypair).unwrap();
        tx.validate_structure(true).unwrap();

        let mut tampered = tx.clone();
        tampered.payload = Payload::Transfer {
            to: "mallory".into(),
            value: 5,
        };
        assert!(tampered.validate_structure(true).is_err());

        let mut impostor = Transaction::transfer("someone-else", "bob", 5, 1);
        impostor.sign(&keypair).unwrap();
        let err = impostor.validate_signature().unwrap_err();
        assert!(err.to_string().contains("does not belong"));
    }

    #[test]
    fn test_transfer_execution() {
        let state = funded_state("alice", 100);
        let mut pending = state.pending();

        Transaction::transfer("alice", "bob", 60, 1)
            .execute(&mut pending)
            .unwrap();
        let err = Transaction::transfer("alice", "bob", 60, 2)
            .execute(&mut pending)
            .unwrap_err();
        assert_eq!(err.reason_code(), "economic_error");

        let err = Transaction::transfer("nobody", "bob", 1, 3)
            .execute(&mut pending)
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));

        Transaction::coinbase("miner", 100, 4)
            .execute(&mut pending)
            .unwrap();
        assert_eq!(pending.balance("miner"), Some(100));
    }

    #[test]
    fn test_contract_execution_attaches_result() {
        let state = funded_state("alice", 10);
        let mut pending = state.pending();

        let deploy = Transaction::deploy("alice", samples::TRANSFER_CONTRACT, 1_000);
        let execution = deploy.execute(&mut pending).unwrap();
        let contract_id = execution.contract_id.clone().unwrap();
        let deploy = deploy.with_execution(execution.clone());
        deploy.verify_execution(&execution).unwrap();

        let mut args = BTreeMap::new();
        args.insert("amount".to_string(), Value::Int(100));
        let call = Transaction::call("alice", &contract_id, "deposit", args, 2_000);
        let execution = call.execute(&mut pending).unwrap();
        let recorded = execution.result.clone().unwrap();
        assert_eq!(
            recorded.output,
            Value::from("Deposited 100, new balance: 100")
        );
        assert_eq!(recorded.state_changes["balance"], Value::Int(100));

        let mut tampered = call.with_execution(execution.clone());
        tampered.result = Some(TxResult {
            output: Value::from("Deposited 1000000"),
            state_changes: BTreeMap::new(),
        });
        assert_eq!(
            tampered.verify_execution(&execution).unwrap_err().reason_code(),
            "consensus_error"
        );
    }

    #[test]
    fn test_contract_requires_existing_sender() {
        let state = funded_state("alice", 10);
        let mut pending = state.pending();
        let err = Transaction::deploy("ghost", samples::AUCTION_CONTRACT, 1)
            .execute(&mut pending)
            .unwrap_err();
        assert_eq!(err.reason_code(), "economic_error");

        let err = Transaction::call("alice", "ffffffffffffffff", "bid", BTreeMap::new(), 1)
            .execute(&mut pending)
            .unwrap_err();
        assert_eq!(err.reason_code(), "contract_error");
    }
}
