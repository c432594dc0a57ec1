use std::{
    io::{self, Read, Write},
    sync::{Arc, Barrier},
    thread,
};

use pchain::{
    BlockPool, BufferChain, BufferChainFactory, ConcurrentPool, Deleter, Handle, PoolConfig,
    BLOCK_OVERHEAD,
};

/// A fixed-size record packed into chains, spanning several blocks each.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Tick {
    name: [u8; 4],
    bid: u64,
    offer: u64,
}

impl Tick {
    const SIZE: usize = 20;

    fn new(n: u64) -> Self {
        Self {
            name: *b"TICK",
            bid: n * 2,
            offer: n * 2 + 1,
        }
    }

    fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[..4].copy_from_slice(&self.name);
        bytes[4..12].copy_from_slice(&self.bid.to_le_bytes());
        bytes[12..].copy_from_slice(&self.offer.to_le_bytes());
        bytes
    }

    fn decode(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            name: bytes[..4].try_into().unwrap(),
            bid: u64::from_le_bytes(bytes[4..12].try_into().unwrap()),
            offer: u64::from_le_bytes(bytes[12..].try_into().unwrap()),
        }
    }
}

fn contents<P: BlockPool>(chain: &BufferChain<P>) -> Vec<u8> {
    let mut bytes = vec![0; chain.length()];
    chain.copy_out(&mut bytes, 0);
    bytes
}

#[test]
fn factory_packs_records() {
    const TICKS: u64 = 2000;
    let factory = BufferChainFactory::new(ConcurrentPool::for_buffers(64));

    let case = "pack via replace";
    let mut chain = factory.allocate(0);
    assert_eq!(chain.length(), 0, "{case}");
    for n in 0..TICKS {
        let offset = chain.length();
        chain.replace(offset, &Tick::new(n).encode());
    }
    let length = usize::try_from(TICKS).unwrap() * Tick::SIZE;
    assert_eq!(chain.length(), length, "{case}");
    assert_eq!(chain.block_count(), length.div_ceil(64), "{case}");

    let case = "unpack via copy out";
    let mut bytes = [0; Tick::SIZE];
    for n in [0, 1, 3, 16, 1999] {
        chain.copy_out(&mut bytes, usize::try_from(n).unwrap() * Tick::SIZE);
        assert_eq!(Tick::decode(&bytes), Tick::new(n), "{case}");
    }

    let case = "share via handle";
    let handle = Handle::new(chain, &factory);
    let clone = handle.clone();
    assert_eq!(clone.length(), length, "{case}");
    drop(handle);
    drop(clone);
    assert_eq!(factory.data_pool().outstanding(), 0, "{case}");
}

#[test]
fn factory_chains_across_threads() {
    const THREADS: usize = 8;
    let factory = BufferChainFactory::new(ConcurrentPool::for_buffers(16));
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for n in 0..THREADS {
            let (factory, barrier) = (&factory, &barrier);
            s.spawn(move || {
                let fill = u8::try_from(n).unwrap();
                barrier.wait();
                for round in 0..50 {
                    let mut chain = factory.allocate(0);
                    for _ in 0..n + round {
                        chain.append(&[fill; 7]);
                    }
                    assert!(contents(&chain).iter().all(|&b| b == fill), "round {round}");
                    factory.delete_object(chain);
                }
            });
        }
    });

    assert_eq!(factory.data_pool().outstanding(), 0);
    assert!(factory.control_pool().available() <= THREADS);
}

#[test]
fn handles_shared_across_threads() {
    let factory = BufferChainFactory::new(ConcurrentPool::for_buffers(8));
    let mut handle = factory.allocate_shared(0);
    Handle::get_mut(&mut handle)
        .expect("unique handle")
        .append(b"shared between readers");
    let expected = contents(&handle);

    thread::scope(|s| {
        for _ in 0..4 {
            let handle = handle.clone();
            let expected = &expected;
            s.spawn(move || {
                let mut bytes = Vec::new();
                handle.reader().read_to_end(&mut bytes).unwrap();
                assert_eq!(&bytes, expected);
            });
        }
    });

    assert_eq!(Handle::strong_count(&handle), 1);
    drop(handle);
    assert_eq!(factory.data_pool().outstanding(), 0);
    assert_eq!(factory.control_pool().available(), 1);
}

#[test]
fn chain_donor_between_factory_chains() {
    let factory = BufferChainFactory::new(ConcurrentPool::for_buffers(4));
    let mut chain = factory.allocate(0);
    let mut donor = factory.allocate(8);
    assert_eq!(donor.block_count(), 2);

    chain.set_length_with_donor(8, &mut donor);
    assert_eq!((chain.length(), chain.block_count()), (8, 2));
    assert_eq!((donor.length(), donor.block_count()), (0, 0));
    assert_eq!(factory.data_pool().outstanding(), 2);

    factory.delete_object(donor);
    factory.delete_object(chain);
    assert_eq!(factory.data_pool().outstanding(), 0);
}

#[test]
fn chain_copy_between_factories() {
    let small = BufferChainFactory::new(ConcurrentPool::for_buffers(4));
    let large = BufferChainFactory::new(ConcurrentPool::for_buffers(32));

    let mut source = small.allocate(0);
    source
        .write_all(b"the quick brown fox jumps over the lazy dog")
        .unwrap();
    let mut target = large.allocate(0);
    target.replace_from(0, &source, 4, 15);
    assert_eq!(contents(&target), b"quick brown fox");
    assert_eq!(target.block_count(), 1);
    assert_eq!(source.crc32(), crc32fast::hash(&contents(&source)));

    small.delete_object(source);
    large.delete_object(target);
}

#[test]
fn chain_vectored_output() {
    let factory = BufferChainFactory::new(ConcurrentPool::for_buffers(5));
    let mut chain = factory.allocate(0);
    chain.append(b"scatter/gather output");

    let mut out = io::Cursor::new(Vec::new());
    chain.write_to(&mut out).unwrap();
    assert_eq!(out.into_inner(), b"scatter/gather output");

    let mut blocks = Vec::new();
    chain.blocks_into(&mut blocks);
    assert_eq!(blocks.len(), chain.block_count());
    assert!(blocks.iter().all(|block| block.len() == 5));
    factory.delete_object(chain);
}

#[test]
#[should_panic(expected = "pool: exhausted at 2 blocks")]
fn chain_grow_past_pool_limit() {
    let pool = ConcurrentPool::with_config(PoolConfig {
        block_size: 4 + BLOCK_OVERHEAD,
        max_blocks: Some(2),
        ..PoolConfig::default()
    });
    let mut chain = BufferChain::new(Arc::new(pool));
    chain.append(b"12345678");
    chain.append(b"9");
}
