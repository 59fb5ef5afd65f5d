use bitcoin::{
    absolute::LockTime,
    consensus,
    hashes::Hash,
    hex::FromHex,
    secp256k1::{Message, PublicKey, Secp256k1, SecretKey},
    sighash::SighashCache,
    transaction::Version,
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use legacy_script::{disasm, verify};

struct BenchCase {
    name: &'static str,
    script_pubkey: Vec<u8>,
    tx_bytes: Vec<u8>,
}

pub fn verification_bench(c: &mut Criterion) {
    let cases = vec![legacy_p2pkh_case(), bare_multisig_case(), arithmetic_case()];

    let mut group = c.benchmark_group("verify");
    for case in cases {
        group.bench_with_input(BenchmarkId::new("legacy", case.name), &case, |b, case| {
            b.iter(|| run_case(case));
        });
    }
    group.finish();
}

fn run_case(case: &BenchCase) {
    let valid = verify(case.script_pubkey.as_slice(), &case.tx_bytes, 0).expect("verification");
    assert!(valid, "{} should validate", case.name);
}

fn legacy_p2pkh_case() -> BenchCase {
    let spent = Vec::from_hex("76a9144bfbaf6afb76cc5771bc6404810d1cc041a6933988ac").unwrap();
    let spending = Vec::from_hex("02000000013f7cebd65c27431a90bba7f796914fe8cc2ddfc3f2cbd6f7e5f2fc854534da95000000006b483045022100de1ac3bcdfb0332207c4a91f3832bd2c2915840165f876ab47c5f8996b971c3602201c6c053d750fadde599e6f5c4e1963df0f01fc0d97815e8157e3d59fe09ca30d012103699b464d1d8bc9e47d4fb1cdaa89a1c5783d68363c4dbc4b524ed3d857148617feffffff02836d3c01000000001976a914fc25d6d5c94003bf5b0c7b640a248e2c637fcfb088ac7ada8202000000001976a914fbed3d9b11183209a57999d54d59f67c019e756c88ac6acb0700").unwrap();
    BenchCase {
        name: "p2pkh",
        script_pubkey: spent,
        tx_bytes: spending,
    }
}

/// 2-of-3 bare multisig where the second signature matches the last key, so
/// every key is tried.
fn bare_multisig_case() -> BenchCase {
    let secp = Secp256k1::new();
    let keys: Vec<SecretKey> = (1..=3u8)
        .map(|n| SecretKey::from_slice(&[n; 32]).unwrap())
        .collect();

    let mut script_pubkey = vec![0x52];
    for key in &keys {
        let pubkey = PublicKey::from_secret_key(&secp, key).serialize();
        disasm::encode_push(&pubkey, &mut script_pubkey);
    }
    script_pubkey.extend_from_slice(&[0x53, 0xae]);

    let mut tx = single_input_tx(ScriptBuf::new());
    let sighash = SighashCache::new(&tx)
        .legacy_signature_hash(0, &ScriptBuf::from_bytes(script_pubkey.clone()), 0x01)
        .unwrap();
    let msg = Message::from_digest(sighash.to_byte_array());

    let mut script_sig = vec![0x00];
    for key in [&keys[0], &keys[2]] {
        let mut sig = secp.sign_ecdsa(&msg, key).serialize_der().to_vec();
        sig.push(0x01);
        disasm::encode_push(&sig, &mut script_sig);
    }
    tx.input[0].script_sig = ScriptBuf::from_bytes(script_sig);

    BenchCase {
        name: "multisig_2_of_3",
        script_pubkey,
        tx_bytes: consensus::serialize(&tx),
    }
}

/// Signature-free script exercising stack and arithmetic opcodes only.
fn arithmetic_case() -> BenchCase {
    // scriptSig: 1 2 3 4. scriptPubKey: (DUP DROP) x20 2SWAP ADD ADD ADD 10 NUMEQUAL.
    let mut script_pubkey = Vec::new();
    for _ in 0..20 {
        script_pubkey.extend_from_slice(&[0x76, 0x75]);
    }
    script_pubkey.extend_from_slice(&[0x72, 0x93, 0x93, 0x93, 0x5a, 0x9c]);

    let tx = single_input_tx(ScriptBuf::from_bytes(vec![0x51, 0x52, 0x53, 0x54]));
    BenchCase {
        name: "stack_arithmetic",
        script_pubkey,
        tx_bytes: consensus::serialize(&tx),
    }
}

fn single_input_tx(script_sig: ScriptBuf) -> Transaction {
    Transaction {
        version: Version(1),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::default(),
            script_sig,
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

criterion_group!(benches, verification_bench);
criterion_main!(benches);
