use crate::error::{MintError, Result};
use crate::utxo::SpendableOutput;
use bitcoin::absolute::LockTime;
use bitcoin::ecdsa::Signature;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, CompressedPublicKey, Network, PrivateKey, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Txid, Witness,
};

/// Signed, finalized transaction ready for broadcast.
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub txid: Txid,
    pub hex: String,
    pub input_value: u64,
    pub transaction: Transaction,
}

impl BuiltTransaction {
    pub fn output_value(&self) -> u64 {
        self.transaction
            .output
            .iter()
            .map(|output| output.value.to_sat())
            .sum()
    }

    pub fn fee(&self) -> u64 {
        self.input_value.saturating_sub(self.output_value())
    }
}

pub trait TransactionSigner {
    /// Script every spent input is locked to; change is returned here too.
    fn script_pubkey(&self) -> ScriptBuf;

    /// Adds `inputs` and `outputs` in order, signs every input and finalizes the witnesses.
    fn sign_and_finalize(
        &self,
        inputs: &[SpendableOutput],
        outputs: Vec<TxOut>,
    ) -> Result<BuiltTransaction>;
}

/// Single-key signer for native segwit v0 outputs.
pub struct P2wpkhSigner {
    secp: Secp256k1<All>,
    private_key: PrivateKey,
    public_key: CompressedPublicKey,
    address: Address,
}

impl P2wpkhSigner {
    pub fn new(private_key: PrivateKey, network: Network) -> Result<Self> {
        let secp = Secp256k1::new();
        let public_key = CompressedPublicKey::from_private_key(&secp, &private_key)
            .map_err(|err| MintError::Configuration(format!("unsupported private key: {err}")))?;
        let address = Address::p2wpkh(&public_key, network);
        Ok(Self {
            secp,
            private_key,
            public_key,
            address,
        })
    }

    pub fn from_wif(wif: &str, network: Network) -> Result<Self> {
        let private_key = PrivateKey::from_wif(wif.trim())
            .map_err(|err| MintError::Configuration(format!("invalid WIF private key: {err}")))?;
        Self::new(private_key, network)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

impl TransactionSigner for P2wpkhSigner {
    fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    fn sign_and_finalize(
        &self,
        inputs: &[SpendableOutput],
        outputs: Vec<TxOut>,
    ) -> Result<BuiltTransaction> {
        let transaction = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs
                .iter()
                .map(|input| TxIn {
                    previous_output: input.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::default(),
                })
                .collect(),
            output: outputs,
        };

        let script_pubkey = self.script_pubkey();
        let sighash_type = EcdsaSighashType::All;
        let mut cache = SighashCache::new(transaction);
        for (index, input) in inputs.iter().enumerate() {
            let sighash = cache
                .p2wpkh_signature_hash(
                    index,
                    &script_pubkey,
                    Amount::from_sat(input.value),
                    sighash_type,
                )
                .map_err(|err| MintError::Signing {
                    index,
                    reason: err.to_string(),
                })?;
            let message = Message::from_digest(sighash.to_byte_array());
            let signature = Signature {
                signature: self.secp.sign_ecdsa(&message, &self.private_key.inner),
                sighash_type,
            };
            let witness = cache.witness_mut(index).ok_or_else(|| MintError::Signing {
                index,
                reason: "input missing from transaction".to_string(),
            })?;
            *witness = Witness::p2wpkh(&signature, &self.public_key.0);
        }

        let transaction = cache.into_transaction();
        let input_value = inputs.iter().map(|input| input.value).sum();
        Ok(BuiltTransaction {
            txid: transaction.compute_txid(),
            hex: hex::encode(bitcoin::consensus::serialize(&transaction)),
            input_value,
            transaction,
        })
    }
}
