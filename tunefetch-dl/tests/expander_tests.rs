//! Track list expansion against fake collaborators

mod helpers;

use async_trait::async_trait;
use helpers::{FakeFetcher, FakeGenerator};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tunefetch_dl::services::classifier::classify;
use tunefetch_dl::services::{ExpanderSettings, ExpansionError, RetryPolicy, SubmitOptions, TrackListExpander};
use tunefetch_dl::types::{
    GeneratedTrack, GeneratorError, PlaylistEntry, ResolvedPlaylist, TracklistGenerator,
};

fn settings() -> ExpanderSettings {
    ExpanderSettings {
        call_policy: RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(20)),
        call_timeout: Duration::from_millis(200),
        default_track_count: 30,
        default_playlist_name: "pasted_playlist".to_string(),
    }
}

fn expander(fetcher: Arc<FakeFetcher>, generator: Arc<dyn TracklistGenerator>) -> TrackListExpander {
    TrackListExpander::new(fetcher, generator, settings())
}

/// Never answers within the call timeout
struct StalledGenerator;

#[async_trait]
impl TracklistGenerator for StalledGenerator {
    async fn generate(&self, _description: &str, _max_count: usize) -> Result<Vec<GeneratedTrack>, GeneratorError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_direct_url_is_one_locator_unit() {
    let e = expander(Arc::new(FakeFetcher::new()), Arc::new(FakeGenerator::returning(&[])));

    let expansion = e
        .expand(&classify("https://youtu.be/abc"), &SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(expansion.units.len(), 1);
    assert_eq!(expansion.units[0].source_locator.as_deref(), Some("https://youtu.be/abc"));
    assert!(expansion.playlist_name.is_none());
}

#[tokio::test]
async fn test_search_is_one_query_unit() {
    let e = expander(Arc::new(FakeFetcher::new()), Arc::new(FakeGenerator::returning(&[])));

    let expansion = e
        .expand(&classify("Radiohead  -  Creep"), &SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(expansion.units.len(), 1);
    assert_eq!(expansion.units[0].query_hint, "Radiohead - Creep");
    assert!(expansion.units[0].source_locator.is_none());
}

#[tokio::test]
async fn test_pasted_list_warns_about_bad_lines() {
    let e = expander(Arc::new(FakeFetcher::new()), Arc::new(FakeGenerator::returning(&[])));
    let input = "Miles Davis - So What\nJohn Coltrane - Blue Train\n???\nBill Evans - Peace Piece";

    let expansion = e.expand(&classify(input), &SubmitOptions::default()).await.unwrap();

    let hints: Vec<&str> = expansion.units.iter().map(|u| u.query_hint.as_str()).collect();
    assert_eq!(
        hints,
        vec!["Miles Davis - So What", "John Coltrane - Blue Train", "Bill Evans - Peace Piece"]
    );
    let positions: Vec<usize> = expansion.units.iter().map(|u| u.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
    assert_eq!(expansion.warnings.len(), 1);
    assert!(expansion.warnings[0].contains("line 3"));
}

#[tokio::test]
async fn test_empty_playlist_is_an_error() {
    let url = "https://www.youtube.com/playlist?list=PLempty";
    let fetcher = FakeFetcher::new();
    fetcher.set_playlist(
        url,
        Ok(ResolvedPlaylist {
            title: Some("Nothing".to_string()),
            entries: Vec::new(),
        }),
    );
    let e = expander(Arc::new(fetcher), Arc::new(FakeGenerator::returning(&[])));

    let err = e.expand(&classify(url), &SubmitOptions::default()).await.unwrap_err();
    assert_eq!(err, ExpansionError::EmptyPlaylist);
}

#[tokio::test]
async fn test_spotify_playlist_is_searched_track_by_track() {
    let url = "https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M";
    let fetcher = FakeFetcher::new();
    fetcher.set_playlist(
        url,
        Ok(ResolvedPlaylist {
            title: None,
            entries: vec![
                PlaylistEntry {
                    locator: Some("https://open.spotify.com/track/1".into()),
                    artist: Some("Sabrina Carpenter".into()),
                    title: Some("Espresso".into()),
                },
                PlaylistEntry {
                    locator: Some("https://open.spotify.com/track/2".into()),
                    artist: Some("Chappell Roan".into()),
                    title: Some("Good Luck, Babe!".into()),
                },
            ],
        }),
    );
    let e = expander(Arc::new(fetcher), Arc::new(FakeGenerator::returning(&[])));

    let expansion = e.expand(&classify(url), &SubmitOptions::default()).await.unwrap();

    let hints: Vec<&str> = expansion.units.iter().map(|u| u.query_hint.as_str()).collect();
    assert_eq!(hints, vec!["Sabrina Carpenter - Espresso", "Chappell Roan - Good Luck, Babe!"]);
    assert!(expansion.units.iter().all(|u| u.source_locator.is_none()));
    assert_eq!(
        expansion.playlist_name.as_deref(),
        Some("spotify_playlist_37i9dQZF1DXcBWIGoYBM5M")
    );
}

#[tokio::test]
async fn test_spotify_track_and_album_links_are_rejected() {
    let fetcher = Arc::new(FakeFetcher::new());
    let e = expander(fetcher.clone(), Arc::new(FakeGenerator::returning(&[])));

    let cases = [
        ("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC", "Spotify track"),
        ("https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3", "Spotify album"),
    ];
    for (url, label) in cases {
        let err = e.expand(&classify(url), &SubmitOptions::default()).await.unwrap_err();
        assert_eq!(err, ExpansionError::UnsupportedLink(label.to_string()));
        assert!(err.to_string().contains("Artist - Title"));
    }
    assert_eq!(fetcher.playlist_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fetcher.total_attempts(), 0);
}

#[tokio::test]
async fn test_vibe_count_is_bounded() {
    let generator = Arc::new(FakeGenerator::returning(&[("Phoenix", "1901")]));
    let e = expander(Arc::new(FakeFetcher::new()), generator.clone());
    let request = classify("dreamy late night synthwave");

    for (requested, expected) in [(Some(0), 1), (Some(500), 100), (Some(12), 12), (None, 30)] {
        let options = SubmitOptions {
            playlist_name: None,
            track_count: requested,
        };
        e.expand(&request, &options).await.unwrap();
        assert_eq!(generator.last_count.load(Ordering::SeqCst), expected);
    }
}

#[tokio::test]
async fn test_vibe_caps_generated_list_at_requested_count() {
    let generator = Arc::new(FakeGenerator::returning(&helpers::road_trip_pairs()));
    let e = expander(Arc::new(FakeFetcher::new()), generator);
    let options = SubmitOptions {
        playlist_name: None,
        track_count: Some(3),
    };

    let expansion = e
        .expand(&classify("upbeat indie rock for summer road trips"), &options)
        .await
        .unwrap();

    assert_eq!(expansion.units.len(), 3);
    assert_eq!(expansion.units[0].artist_hint.as_deref(), Some("Phoenix"));
    assert_eq!(expansion.units[0].title_hint.as_deref(), Some("1901"));
}

#[tokio::test]
async fn test_vibe_with_no_usable_tracks() {
    let generator = Arc::new(FakeGenerator::returning(&[("", "Kids"), ("MGMT", "  ")]));
    let e = expander(Arc::new(FakeFetcher::new()), generator);

    let err = e
        .expand(&classify("songs that feel like autumn"), &SubmitOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, ExpansionError::EmptyGeneration);
}

#[tokio::test]
async fn test_stalled_generator_times_out() {
    let e = expander(Arc::new(FakeFetcher::new()), Arc::new(StalledGenerator));

    let err = e
        .expand(&classify("songs that feel like autumn"), &SubmitOptions::default())
        .await
        .unwrap_err();

    match err {
        ExpansionError::GenerationFailed(reason) => assert!(reason.contains("timed out")),
        other => panic!("expected generation failure, got {:?}", other),
    }
}
