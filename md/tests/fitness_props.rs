//! Property tests for the fitness counters

use missionstore::{Store, TeamKey, beta_mean_score};
use proptest::prelude::*;

fn key() -> TeamKey {
    TeamKey {
        agent_id: "dev-prop".into(),
        pattern_id: "sequential".into(),
        technology: "generic".into(),
        phase_type: "dev".into(),
    }
}

proptest! {
    // For any outcome sequence: runs = wins + losses exactly, and the score
    // is the Beta posterior mean within 1e-9.
    #[test]
    fn runs_always_equal_wins_plus_losses(outcomes in proptest::collection::vec(any::<bool>(), 0..60)) {
        let mut store = Store::open_in_memory().unwrap();
        let key = key();

        let mut wins = 0i64;
        let mut losses = 0i64;
        for win in outcomes {
            let row = store.update_team_fitness(&key, win).unwrap();
            if win { wins += 1 } else { losses += 1 }

            prop_assert_eq!(row.runs, row.wins + row.losses);
            prop_assert_eq!(row.wins, wins);
            prop_assert_eq!(row.losses, losses);
            prop_assert!((row.score - beta_mean_score(wins, losses)).abs() < 1e-9);
            prop_assert!((0.0..=100.0).contains(&row.score));
        }
    }

    #[test]
    fn score_is_monotone_in_wins(wins in 0i64..200, losses in 0i64..200) {
        let score = beta_mean_score(wins, losses);
        let better = beta_mean_score(wins + 1, losses);
        let worse = beta_mean_score(wins, losses + 1);
        prop_assert!(better > score);
        prop_assert!(worse < score);
    }
}
