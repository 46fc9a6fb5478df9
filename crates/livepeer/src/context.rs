//! Per-event handler context.
//!
//! Bundles everything a handler may touch while applying one log: the staged
//! batch, the contract reader, the protocol aggregate and the envelope being
//! applied. Load-or-create helpers live here so that every handler creates
//! entities the same way.

use bondgraph_core::{Address, BrokenInvariant, Savepoint, StateBatch, StateError, StateStore};
use tracing::debug;

use crate::{
    config::NetworkConfig,
    events::Envelope,
    ids,
    model::{Account, Broadcaster, Day, Delegator, Keyed, PollWatch, Protocol, Transcoder},
    reader::{CallResultExt as _, ContractReader, DelegatorInfo},
    HandlerError,
};

/// Poll watch changes staged by the handlers of one event, applied to the
/// registry once the batch commits.
#[derive(Debug, Clone, Default)]
pub struct WatchChanges {
    pub next_seq: u64,
    pub added: Vec<PollWatch>,
    pub closed: Vec<u64>,
}

/// State a handler can be rolled back to.
pub struct CtxSavepoint {
    batch: Savepoint,
    protocol: Protocol,
    watches: WatchChanges,
}

pub struct Ctx<'a, S: StateStore, R: ContractReader> {
    pub batch: &'a mut StateBatch<S>,
    pub reader: &'a mut R,
    pub protocol: &'a mut Protocol,
    pub network: &'a NetworkConfig,
    pub envelope: &'a Envelope,
    pub watches: WatchChanges,
}

impl<'a, S: StateStore, R: ContractReader> Ctx<'a, S, R> {
    pub fn new(
        batch: &'a mut StateBatch<S>,
        reader: &'a mut R,
        protocol: &'a mut Protocol,
        network: &'a NetworkConfig,
        envelope: &'a Envelope,
        next_watch_seq: u64,
    ) -> Self {
        Self {
            batch,
            reader,
            protocol,
            network,
            envelope,
            watches: WatchChanges {
                next_seq: next_watch_seq,
                ..Default::default()
            },
        }
    }

    pub fn savepoint(&self) -> CtxSavepoint {
        CtxSavepoint {
            batch: self.batch.savepoint(),
            protocol: self.protocol.clone(),
            watches: self.watches.clone(),
        }
    }

    pub fn restore(&mut self, savepoint: CtxSavepoint) {
        self.batch.restore(savepoint.batch);
        *self.protocol = savepoint.protocol;
        self.watches = savepoint.watches;
    }

    pub fn timestamp(&self) -> u64 {
        self.envelope.block.timestamp
    }

    /// Block number as seen by the rounds manager, the envelope's block when
    /// the read reverts.
    pub fn block_num(&mut self) -> u64 {
        let fallback = self.envelope.block.number;
        self.reader.block_num().or_fallback("blockNum", fallback)
    }

    pub fn load<T: Keyed>(&self, key: impl AsRef<[u8]>) -> Result<Option<T>, StateError> {
        self.batch.load(key)
    }

    /// Loads an entity whose existence is implied by state already stored.
    pub fn require<T: Keyed>(&self, key: &str) -> Result<T, HandlerError> {
        self.batch.load::<T>(key)?.ok_or_else(|| {
            BrokenInvariant::MissingEntity {
                ns: T::NS,
                key: key.to_string(),
            }
            .into()
        })
    }

    pub fn save<T: Keyed>(&mut self, entity: &T) -> Result<(), StateError> {
        self.batch.save(entity.key(), entity)
    }

    pub fn delete<T: Keyed>(&mut self, key: &str) {
        self.batch.delete::<T>(key)
    }

    pub fn delegator_info(&mut self, delegator: &Address) -> Option<DelegatorInfo> {
        self.reader.get_delegator(delegator).available("getDelegator")
    }

    fn touch_account(
        &mut self,
        id: &str,
        as_delegator: bool,
        as_delegate: bool,
    ) -> Result<(), StateError> {
        let mut account = self.load::<Account>(id)?.unwrap_or_else(|| Account {
            id: id.to_string(),
            ..Default::default()
        });

        if as_delegator {
            account.delegator = Some(id.to_string());
        }

        if as_delegate {
            account.delegate = Some(id.to_string());
        }

        account.last_updated_timestamp = self.timestamp();

        self.save(&account)
    }

    pub fn account(&mut self, address: &Address) -> Result<(), StateError> {
        self.touch_account(&ids::address_id(address), false, false)
    }

    pub fn transcoder(&mut self, address: &Address) -> Result<Transcoder, StateError> {
        self.transcoder_by_id(&ids::address_id(address))
    }

    pub fn transcoder_by_id(&mut self, id: &str) -> Result<Transcoder, StateError> {
        let transcoder = match self.load::<Transcoder>(id)? {
            Some(x) => x,
            None => {
                debug!(transcoder = id, "creating transcoder");
                let created = Transcoder::new(id);
                self.save(&created)?;
                created
            }
        };

        self.touch_account(id, false, true)?;

        Ok(transcoder)
    }

    pub fn delegator(&mut self, address: &Address) -> Result<Delegator, StateError> {
        let id = ids::address_id(address);

        let delegator = match self.load::<Delegator>(&id)? {
            Some(x) => x,
            None => {
                debug!(delegator = %id, "creating delegator");
                let created = Delegator::new(&id);
                self.save(&created)?;
                created
            }
        };

        self.touch_account(&id, true, false)?;

        Ok(delegator)
    }

    /// Loads or creates a broadcaster, marking it active for the rolling
    /// volume windows.
    pub fn broadcaster(&mut self, address: &Address) -> Result<Broadcaster, StateError> {
        let id = ids::address_id(address);

        let broadcaster = match self.load::<Broadcaster>(&id)? {
            Some(x) => x,
            None => {
                debug!(broadcaster = %id, "creating broadcaster");
                let created = Broadcaster {
                    id: id.clone(),
                    ..Default::default()
                };
                self.save(&created)?;
                created
            }
        };

        self.protocol.mark_broadcaster_active(&id);

        Ok(broadcaster)
    }

    pub fn day(&mut self) -> Result<Day, StateError> {
        let timestamp = self.timestamp();
        let number = ids::day_number(timestamp);

        let day = match self.load::<Day>(number.to_string())? {
            Some(x) => x,
            None => {
                let created = Day {
                    id: number,
                    date: ids::day_start(timestamp),
                    ..Default::default()
                };
                self.save(&created)?;
                created
            }
        };

        Ok(day)
    }

    /// Stages a new poll watch; it becomes active for subsequent events once
    /// the batch commits.
    pub fn watch(&mut self, poll: &str, voter: Address) -> Result<(), StateError> {
        let watch = PollWatch {
            seq: self.watches.next_seq,
            poll: poll.to_string(),
            voter,
        };

        self.watches.next_seq += 1;
        self.save(&watch)?;

        debug!(poll, %voter, seq = watch.seq, "watching voter");
        self.watches.added.push(watch);

        Ok(())
    }

    pub fn unwatch(&mut self, watch: &PollWatch) {
        self.delete::<PollWatch>(&watch.key());
        self.watches.closed.push(watch.seq);
    }
}
