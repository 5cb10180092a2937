use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use jmzk_core::block::SignedBlock;
use jmzk_core::error::ChainError;
use jmzk_core::types::{BlockNum, Digest};
use jmzk_genesis::GenesisState;

const LOG_MAGIC: &[u8; 4] = b"JBLG";
const LOG_VERSION: u32 = 1;

fn log_err(msg: impl Into<String>) -> ChainError {
    ChainError::BlockLog(msg.into())
}

/// Append-only block archive: `blocks.log` holds length-prefixed block
/// records behind a genesis-anchored header, `blocks.index` maps block
/// number to file offset. Only irreversible blocks are appended, strictly
/// in order.
pub struct BlockLog {
    log_path: PathBuf,
    index_path: PathBuf,
    /// Entry i is the log offset of block `first_block_num + i`.
    offsets: Vec<u64>,
    first_block_num: BlockNum,
    head: Option<SignedBlock>,
    genesis: Option<GenesisState>,
}

impl BlockLog {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, ChainError> {
        std::fs::create_dir_all(&dir)?;
        let log_path = dir.as_ref().join("blocks.log");
        let index_path = dir.as_ref().join("blocks.index");

        let mut log = Self {
            log_path,
            index_path,
            offsets: Vec::new(),
            first_block_num: 1,
            head: None,
            genesis: None,
        };
        if log.log_path.exists() {
            log.load()?;
        }
        Ok(log)
    }

    fn load(&mut self) -> Result<(), ChainError> {
        let mut file = File::open(&self.log_path)?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(log_err("bad block log magic"));
        }
        let mut word = [0u8; 4];
        file.read_exact(&mut word)?;
        if u32::from_le_bytes(word) != LOG_VERSION {
            return Err(log_err("unsupported block log version"));
        }
        file.read_exact(&mut word)?;
        let genesis_len = u32::from_le_bytes(word) as usize;
        let mut genesis_bytes = vec![0u8; genesis_len];
        file.read_exact(&mut genesis_bytes)?;
        self.genesis = Some(bincode::deserialize(&genesis_bytes)?);

        // Rebuild the offset table from the index file.
        let mut index = File::open(&self.index_path)?;
        let mut buf = Vec::new();
        index.read_to_end(&mut buf)?;
        if buf.len() % 8 != 0 {
            return Err(log_err("truncated block index"));
        }
        self.offsets = buf
            .chunks(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();

        if let Some(&last) = self.offsets.last() {
            self.head = Some(self.read_at(&mut file, last)?);
            let head_num = self.head.as_ref().unwrap().block_num();
            self.first_block_num = head_num + 1 - self.offsets.len() as BlockNum;
        }
        Ok(())
    }

    fn read_at(&self, file: &mut File, offset: u64) -> Result<SignedBlock, ChainError> {
        file.seek(SeekFrom::Start(offset))?;
        let mut word = [0u8; 4];
        file.read_exact(&mut word)?;
        let len = u32::from_le_bytes(word) as usize;
        let mut body = vec![0u8; len];
        file.read_exact(&mut body)?;
        Ok(bincode::deserialize(&body)?)
    }

    pub fn head(&self) -> Option<&SignedBlock> {
        self.head.as_ref()
    }

    pub fn genesis(&self) -> Option<&GenesisState> {
        self.genesis.as_ref()
    }

    /// Start a fresh log anchored at `genesis` with the genesis block as
    /// its first record.
    pub fn reset_to_genesis(
        &mut self,
        genesis: &GenesisState,
        head_block: SignedBlock,
    ) -> Result<(), ChainError> {
        let mut file = File::create(&self.log_path)?;
        file.write_all(LOG_MAGIC)?;
        file.write_all(&LOG_VERSION.to_le_bytes())?;
        let genesis_bytes = bincode::serialize(genesis)?;
        file.write_all(&(genesis_bytes.len() as u32).to_le_bytes())?;
        file.write_all(&genesis_bytes)?;
        file.sync_all()?;
        File::create(&self.index_path)?;

        self.offsets.clear();
        self.first_block_num = head_block.block_num();
        self.head = None;
        self.genesis = Some(genesis.clone());
        info!(block_num = head_block.block_num(), "block log reset to genesis");
        self.append_unchecked(head_block)
    }

    /// Append the next irreversible block. It must link to the current
    /// log head.
    pub fn append(&mut self, block: SignedBlock) -> Result<(), ChainError> {
        let head = self.head.as_ref().ok_or_else(|| log_err("append to empty block log"))?;
        if block.header.previous != head.id() {
            return Err(ChainError::UnlinkableBlock(format!(
                "block {} does not link to log head {}",
                block.block_num(),
                head.block_num()
            )));
        }
        if block.block_num() != head.block_num() + 1 {
            return Err(ChainError::UnlinkableBlock(format!(
                "expected block {} got {}",
                head.block_num() + 1,
                block.block_num()
            )));
        }
        self.append_unchecked(block)
    }

    fn append_unchecked(&mut self, block: SignedBlock) -> Result<(), ChainError> {
        let mut file = OpenOptions::new().append(true).open(&self.log_path)?;
        let offset = file.seek(SeekFrom::End(0))?;
        let body = bincode::serialize(&block)?;
        file.write_all(&(body.len() as u32).to_le_bytes())?;
        file.write_all(&body)?;
        file.sync_all()?;

        let mut index = OpenOptions::new().create(true).append(true).open(&self.index_path)?;
        index.write_all(&offset.to_le_bytes())?;
        index.sync_all()?;

        self.offsets.push(offset);
        self.head = Some(block);
        Ok(())
    }

    pub fn read_block_by_num(&self, num: BlockNum) -> Result<Option<SignedBlock>, ChainError> {
        if num < self.first_block_num {
            return Ok(None);
        }
        let idx = (num - self.first_block_num) as usize;
        let Some(&offset) = self.offsets.get(idx) else {
            return Ok(None);
        };
        let mut file = File::open(&self.log_path)?;
        Ok(Some(self.read_at(&mut file, offset)?))
    }

    pub fn head_id(&self) -> Option<Digest> {
        self.head.as_ref().map(|b| b.id())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use jmzk_core::block::{BlockHeader, BlockTimestamp};
    use jmzk_core::types::Signature;
    use jmzk_core::n128;

    fn genesis() -> GenesisState {
        GenesisState::default()
    }

    fn block_after(prev: &SignedBlock) -> SignedBlock {
        let header = BlockHeader {
            timestamp: BlockTimestamp(prev.header.timestamp.0 + 1),
            producer: n128!("evt"),
            confirmed: 0,
            previous: prev.id(),
            ..BlockHeader::default()
        };
        SignedBlock {
            header,
            producer_signature: Signature { rs: [0u8; 64], recovery: 0 },
            transactions: vec![],
        }
    }

    fn genesis_block(g: &GenesisState) -> SignedBlock {
        SignedBlock {
            header: g.genesis_header(),
            producer_signature: Signature { rs: [0u8; 64], recovery: 0 },
            transactions: vec![],
        }
    }

    #[test]
    fn reset_append_reload() {
        let dir = tempfile::tempdir().unwrap();
        let g = genesis();
        let b1 = genesis_block(&g);
        let b2 = block_after(&b1);
        let b3 = block_after(&b2);

        {
            let mut log = BlockLog::open(dir.path()).unwrap();
            log.reset_to_genesis(&g, b1.clone()).unwrap();
            log.append(b2.clone()).unwrap();
            log.append(b3.clone()).unwrap();
            assert_eq!(log.head().unwrap().block_num(), 3);
        }

        let log = BlockLog::open(dir.path()).unwrap();
        assert_eq!(log.head().unwrap().id(), b3.id());
        assert_eq!(log.read_block_by_num(2).unwrap().unwrap().id(), b2.id());
        assert_eq!(log.read_block_by_num(1).unwrap().unwrap().id(), b1.id());
        assert!(log.read_block_by_num(4).unwrap().is_none());
        assert_eq!(log.genesis().unwrap().compute_chain_id(), g.compute_chain_id());
    }

    #[test]
    fn append_requires_linkage() {
        let dir = tempfile::tempdir().unwrap();
        let g = genesis();
        let b1 = genesis_block(&g);
        let mut log = BlockLog::open(dir.path()).unwrap();
        log.reset_to_genesis(&g, b1.clone()).unwrap();

        // Skipping b2 breaks the chain.
        let b2 = block_after(&b1);
        let b3 = block_after(&b2);
        assert!(matches!(log.append(b3), Err(ChainError::UnlinkableBlock(_))));
    }
}
