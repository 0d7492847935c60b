//! Intégration avec le vrai moteur FLAC : les segments au repos sont des
//! blobs FLAC, relus sans perte après flush et rechargement.

use std::sync::Arc;

use pmocodec::FlacEngine;
use pmopcm::{MemoryStream, PcmChunk, SampleFormat, SampleKind, StreamSpec};
use pmopool::WorkerPool;
use pmostore::{BlobStore, DirStore, MemoryStore};
use pmotimeline::{TimelineConfig, Track};

const RATE: u32 = 8_000;

fn spec() -> StreamSpec {
    StreamSpec::new(SampleFormat::interleaved(SampleKind::I16), RATE, 1)
}

fn small_config() -> TimelineConfig {
    TimelineConfig {
        segment_seconds: 1,
        ..Default::default()
    }
}

fn flac_track(store: Arc<dyn BlobStore>) -> Track<FlacEngine> {
    Track::new(
        spec(),
        WorkerPool::new(2, FlacEngine::new),
        store,
        small_config(),
    )
    .unwrap()
}

fn tone(frames: usize) -> Vec<i16> {
    (0..frames)
        .map(|i| ((i as f64 * 0.03).sin() * 9_000.0) as i16)
        .collect()
}

#[tokio::test]
async fn test_flac_roundtrip_through_segments() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
    let mut track = flac_track(Arc::clone(&store));

    // 2,5 s à 8 kHz avec fenêtre d'1 s : trois segments au repos.
    let samples = tone((RATE as usize * 5) / 2);
    let expected = PcmChunk::from_i16_samples(samples.clone(), RATE, 1);
    track
        .append(MemoryStream::from_chunk(PcmChunk::from_i16_samples(
            samples, RATE, 1,
        )))
        .await
        .unwrap();
    track.flush().await.unwrap();
    assert_eq!(track.segments().len(), 3);

    let bytes = track.reader(0, None).collect_bytes().await.unwrap();
    assert_eq!(&bytes[..], expected.data().as_ref());
}

#[tokio::test]
async fn test_flac_blobs_survive_reload_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn BlobStore> = Arc::new(DirStore::new(dir.path()).unwrap());

    let samples = tone(RATE as usize * 2);
    let expected = PcmChunk::from_i16_samples(samples.clone(), RATE, 1);

    let track_id = {
        let mut track = flac_track(Arc::clone(&store));
        track
            .append(MemoryStream::from_chunk(PcmChunk::from_i16_samples(
                samples, RATE, 1,
            )))
            .await
            .unwrap();
        track.flush().await.unwrap();
        track.id()
    };

    let mut reloaded = Track::load(
        track_id,
        WorkerPool::new(2, FlacEngine::new),
        Arc::clone(&store),
        small_config(),
    )
    .await
    .unwrap();
    assert_eq!(reloaded.duration(), RATE as u64 * 2);

    let bytes = reloaded.reader(0, None).collect_bytes().await.unwrap();
    assert_eq!(&bytes[..], expected.data().as_ref());
}

#[tokio::test]
async fn test_at_rest_blobs_are_actually_flac() {
    let store = Arc::new(MemoryStore::new());
    let mut track = flac_track(Arc::clone(&store) as Arc<dyn BlobStore>);
    track
        .append(MemoryStream::from_chunk(PcmChunk::from_i16_samples(
            tone(RATE as usize),
            RATE,
            1,
        )))
        .await
        .unwrap();
    track.flush().await.unwrap();

    let segment = track.segments()[0].id;
    let blob = store
        .get(&format!("pmoedit-data-{segment}"))
        .await
        .unwrap()
        .unwrap();
    assert!(blob.starts_with(b"fLaC"));
    // Compressé : nettement plus petit que le PCM brut.
    assert!(blob.len() < RATE as usize * 2);
}
