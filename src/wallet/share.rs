//! A wallet key share: one party's encrypted protocol state.
//!
//! The persisted columns are the ciphertext (`Data`) and the
//! credential's public material (`Key`); pre-params and decrypted
//! save-data only ever live in memory during a protocol run and are
//! never serialised.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::cipher::{self, envelope, Credential, CredentialKind, KeyDescription};
use crate::env::Env;
use crate::error::WalletError;
use crate::id::Xid;
use crate::protocol::{PartyId, PreParams, SaveData};
use crate::transport::api::fetch_fleet;
use crate::util;

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WalletKey {
    pub id: Xid,
    /// Parent wallet id; shares never hold a live wallet reference.
    pub wallet: Xid,
    /// Generation this share belongs to; only shares matching the
    /// wallet's generation are active.
    #[serde(default)]
    pub gen: u64,
    #[serde(rename = "Type")]
    pub kind: CredentialKind,
    /// Credential public material: SPKI DER (base64url) for
    /// Password/StoreKey, the session id for RemoteKey, empty for Plain.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    /// The sealed share payload.
    #[serde(with = "crate::util::b64_bytes", default)]
    pub data: Vec<u8>,

    #[serde(skip)]
    pub(crate) pre: Option<PreParams>,
    #[serde(skip)]
    pub(crate) sdata: Option<SaveData>,
}

impl fmt::Debug for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletKey")
            .field("id", &self.id)
            .field("wallet", &self.wallet)
            .field("gen", &self.gen)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl WalletKey {
    /// A fresh share for a protocol run, carrying its pre-params.
    pub(crate) fn create(wallet: &Xid, kind: CredentialKind, gen: u64, pre: PreParams) -> Self {
        Self {
            id: Xid::new("wkey"),
            wallet: wallet.clone(),
            gen,
            kind,
            key: String::new(),
            data: Vec::new(),
            pre: Some(pre),
            sdata: None,
        }
    }

    /// The share's protocol identity: its id string plus the 16 id bytes
    /// as the party's big-integer key.
    pub fn party_id(&self) -> PartyId {
        PartyId::from_share_id(&self.id)
    }

    /// Copy without the in-memory protocol state; what the store keeps.
    pub fn strip_transient(&self) -> Self {
        let mut copy = self.clone();
        copy.pre = None;
        copy.sdata = None;
        copy
    }

    /// Seal the share's save-data under the given credential, filling the
    /// `Key` and `Data` columns. RemoteKey shares are sealed to the
    /// remote fleet's identities and uploaded; the session id becomes the
    /// stored key.
    pub(crate) async fn seal(&mut self, env: &Env, desc: &KeyDescription) -> Result<(), WalletError> {
        let sdata = self
            .sdata
            .as_ref()
            .ok_or_else(|| WalletError::ProtocolAborted("no save data to seal".into()))?;
        let plaintext = Zeroizing::new(sdata.to_json()?);
        self.kind = desc.kind();

        match &desc.credential {
            Credential::RemoteKey(session) => {
                let cards = fetch_fleet(env.remote.as_ref()).await?;
                let mut fleet = Vec::new();
                for card in &cards {
                    let der = util::b64_decode(card).map_err(|_| {
                        WalletError::TransportFailure("bad identity card in fleet".into())
                    })?;
                    fleet.push(cipher::vk_from_spki(&der)?);
                }
                if fleet.is_empty() {
                    return Err(WalletError::TransportFailure("remote fleet is empty".into()));
                }
                let data = envelope::seal(&plaintext, &fleet)?;
                env.remote.set_generated_key(&util::b64(&data), session).await?;
                self.key = session.clone();
                self.data = data;
            }
            credential => {
                let sealed = cipher::seal(&plaintext, credential, &self.id)?;
                self.key = sealed.key;
                self.data = sealed.data;
            }
        }
        Ok(())
    }

    /// Decrypt the share back into protocol save-data. The supplied
    /// credential must match the share's stored scheme; RemoteKey shares
    /// have no local open path, their content is supplied by the live
    /// transport session instead.
    pub fn unseal(&self, desc: &KeyDescription) -> Result<SaveData, WalletError> {
        match (self.kind, &desc.credential) {
            (CredentialKind::Plain, Credential::Plain) => SaveData::from_json(&self.data),
            (CredentialKind::Password, credential @ Credential::Password(_))
            | (CredentialKind::StoreKey, credential @ Credential::StoreKey(_)) => {
                let plaintext =
                    Zeroizing::new(cipher::open(&self.data, &self.key, credential, &self.id)?);
                SaveData::from_json(&plaintext)
            }
            (CredentialKind::RemoteKey, _) => Err(WalletError::InvalidConfiguration(
                "cannot open keys of type RemoteKey".into(),
            )),
            (kind, credential) => Err(WalletError::InvalidConfiguration(format!(
                "credential of type {} cannot open a {kind} share",
                credential.kind()
            ))),
        }
    }
}
